use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use vault_types::api::{AddParticipantsRequest, CreateRoomRequest, UpdateRoomRequest};
use vault_types::events::GatewayEvent;
use vault_types::RoomId;

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::AppState;

/// POST /rooms: the caller is always a participant. Asking for a 1:1 room
/// that already exists returns that room with 200 instead of a duplicate.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut participant_ids = vec![me];
    participant_ids.extend(req.participant_ids.iter().copied().filter(|&id| id != me));

    let room = if !req.is_group && participant_ids.len() == 2 {
        let other = participant_ids[1];
        let (room, created) = state.blocking(move |db| db.open_direct_room(me, other)).await?;
        if !created {
            return Ok((StatusCode::OK, Json(room)));
        }
        room
    } else {
        let is_group = req.is_group;
        let name = req.name;
        state
            .blocking(move |db| db.create_room(name.as_deref(), is_group, me, &participant_ids))
            .await?
    };

    state
        .fanout
        .publish(room.id, GatewayEvent::RoomCreated { room: room.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(room)))
}

/// GET /rooms: the caller's rooms with participants and last message.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = state.blocking(move |db| db.list_rooms_for(me)).await?;
    Ok(Json(rooms))
}

pub async fn get_room(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state.blocking(move |db| db.require_participant(room_id, me)).await?;
    Ok(Json(room))
}

/// PATCH /rooms/{room_id}: rename and/or pin.
pub async fn update_room(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<UpdateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .blocking(move |db| db.update_room(room_id, me, req.name.as_deref(), req.is_pinned))
        .await?;

    state
        .fanout
        .publish(room.id, GatewayEvent::RoomUpdated { room: room.clone() })
        .await;

    Ok(Json(room))
}

/// DELETE /rooms/{room_id}: creator only.
pub async fn delete_room(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, ApiError> {
    let former = state.blocking(move |db| db.delete_room(room_id, me)).await?;

    // Membership rows are gone; notify the participants captured before the delete.
    state
        .fanout
        .publish_to(&former, GatewayEvent::RoomDeleted { chat_room_id: room_id })
        .await;

    info!("Room {} deleted via API by {}", room_id, me);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_participants(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<AddParticipantsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .blocking(move |db| db.add_participants(room_id, me, &req.user_ids))
        .await?;

    state
        .fanout
        .publish(room.id, GatewayEvent::RoomUpdated { room: room.clone() })
        .await;

    Ok(Json(room))
}

pub async fn leave_room(
    State(state): State<AppState>,
    Extension(Caller(me)): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .blocking(move |db| {
            db.leave_room(room_id, me)?;
            db.get_room(room_id)
        })
        .await?;

    state
        .fanout
        .publish(room.id, GatewayEvent::RoomUpdated { room })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
