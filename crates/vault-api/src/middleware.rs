use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use vault_types::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's user id. Identity is issued upstream.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

/// Resolve `X-User-Id` to a known user or reject with 401.
pub async fn require_caller(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id: UserId = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing or malformed X-User-Id header"))?;

    if !state.blocking(move |db| db.user_exists(user_id)).await? {
        return Err(ApiError::unauthorized("Unknown user"));
    }

    req.extensions_mut().insert(Caller(user_id));
    Ok(next.run(req).await)
}
