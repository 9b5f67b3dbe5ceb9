use axum::{Json, http::StatusCode, response::IntoResponse};
use tracing::error;

use vault_db::ChatError;
use vault_types::api::ErrorBody;

/// An HTTP failure: status plus a short message and optional details,
/// rendered as `{"error": ..., "details": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
    details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_server_error(message: &'static str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidMembership(d) => Self::bad_request("Invalid membership").with_details(d),
            ChatError::Validation(d) => Self::bad_request("Validation failed").with_details(d),
            ChatError::NotAuthorized(d) => Self::forbidden("Not authorized").with_details(d),
            ChatError::NotFound(what) => {
                Self::not_found("Not found").with_details(format!("{} not found", what))
            }
            // Integrity faults: logged in full, reported without internals.
            ChatError::Decryption(e) => {
                error!("Codec failure: {}", e);
                Self::internal_server_error("Decryption failed")
            }
            ChatError::Storage(e) => {
                error!("Storage error: {}", e);
                Self::internal_server_error("Internal server error")
            }
            ChatError::LockPoisoned => {
                error!("Database lock poisoned");
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorBody {
            error: self.message.to_string(),
            details: self.details,
        });
        (self.status, body).into_response()
    }
}
