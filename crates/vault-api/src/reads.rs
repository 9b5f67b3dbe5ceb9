use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use vault_types::RoomId;
use vault_types::api::{MarkReadRequest, MarkReadResponse};

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::AppState;

/// POST /rooms/{room_id}/read: advance the caller's read marker.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let advanced = state
        .blocking(move |db| db.mark_read(me, room_id, req.last_message_id))
        .await?;
    Ok(Json(MarkReadResponse { advanced }))
}

/// GET /unread-counts: rooms with nothing unread are omitted.
pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let counts = state.blocking(move |db| db.unread_counts_for(me)).await?;
    Ok(Json(counts))
}
