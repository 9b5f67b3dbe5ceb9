use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use vault_db::{ChatError, NewMessage};
use vault_types::api::{EditMessageRequest, SendMessageRequest};
use vault_types::events::GatewayEvent;
use vault_types::{MessageId, RoomId};

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Message id cursor: only messages older than this are returned.
    pub before: Option<MessageId>,
}

/// POST /rooms/{room_id}/messages
///
/// Fan-out runs after the message is stored and never changes the response.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .blocking(move |db| {
            db.require_participant(room_id, me)?;
            db.append_message(NewMessage {
                chat_room_id: room_id,
                sender_id: me,
                content: &req.content,
                message_type: req.message_type,
                attachment: req.attachment,
                reply_to_id: req.reply_to_id,
                expires_at: req.expires_at,
            })
        })
        .await?;

    state
        .fanout
        .publish(room_id, GatewayEvent::NewMessage { message: message.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /rooms/{room_id}/messages?limit=&before=: oldest to newest.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.pages.clamp(query.limit);
    let messages = state
        .blocking(move |db| {
            db.require_participant(room_id, me)?;
            db.list_messages(room_id, limit, query.before)
        })
        .await?;

    Ok(Json(messages))
}

/// GET /messages/{message_id}: visible to participants of its room.
pub async fn get_message(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(message_id): Path<MessageId>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .blocking(move |db| {
            let message = db.get_message(message_id)?.ok_or(ChatError::NotFound("message"))?;
            db.require_participant(message.chat_room_id, me)?;
            Ok(message)
        })
        .await?;

    Ok(Json(message))
}

/// PATCH /rooms/{room_id}/messages/{message_id}: sender only.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path((room_id, message_id)): Path<(RoomId, MessageId)>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .blocking(move |db| {
            db.require_participant(room_id, me)?;
            let current = db
                .get_message(message_id)?
                .filter(|m| m.chat_room_id == room_id)
                .ok_or(ChatError::NotFound("message"))?;
            if current.sender_id != me {
                return Err(ChatError::NotAuthorized("only the sender can edit a message".into()));
            }
            db.edit_message(message_id, &req.content)
        })
        .await?;

    state
        .fanout
        .publish(room_id, GatewayEvent::MessageEdited { message: message.clone() })
        .await;

    Ok(Json(message))
}
