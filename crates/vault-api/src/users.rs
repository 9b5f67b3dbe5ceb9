use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use vault_types::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /users/{user_id}: profile and presence.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.blocking(move |db| db.get_user(user_id)).await?;
    Ok(Json(user))
}
