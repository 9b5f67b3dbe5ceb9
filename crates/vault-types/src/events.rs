use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatRoom, Message, RoomId, UserId};

/// Events pushed from the server over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Handshake accepted; the connection is now registered
    Ready { user_id: UserId, connection_id: Uuid },

    /// A message was stored in a room the recipient belongs to
    NewMessage { message: Message },

    /// A stored message had its content replaced
    MessageEdited { message: Message },

    RoomCreated { room: ChatRoom },

    /// Name, pin state or membership changed
    RoomUpdated { room: ChatRoom },

    RoomDeleted { chat_room_id: RoomId },

    /// A user sharing a room with the recipient came online or went offline
    PresenceUpdate { user_id: UserId, online: bool },

    /// Sent just before the server closes a connection it rejects
    Error { message: String },
}

impl GatewayEvent {
    /// Returns the room this event is scoped to, if any. Presence, ready and
    /// error frames are addressed to users rather than rooms.
    pub fn chat_room_id(&self) -> Option<RoomId> {
        match self {
            Self::NewMessage { message } | Self::MessageEdited { message } => {
                Some(message.chat_room_id)
            }
            Self::RoomCreated { room } | Self::RoomUpdated { room } => Some(room.id),
            Self::RoomDeleted { chat_room_id } => Some(*chat_room_id),
            Self::Ready { .. } | Self::PresenceUpdate { .. } | Self::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewMessage { .. } => "new_message",
            Self::MessageEdited { .. } => "message_edited",
            Self::RoomCreated { .. } => "room_created",
            Self::RoomUpdated { .. } => "room_updated",
            Self::RoomDeleted { .. } => "room_deleted",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::Error { .. } => "error",
        }
    }
}

/// Frames sent FROM client TO server. The channel is push-only once
/// authenticated, so the handshake is the only command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    Auth { user_id: UserId },
}
