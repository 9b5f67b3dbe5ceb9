//! Shared data model for the vault chat service.
//!
//! Distinct from the `vault-db` row types: these are what crosses the HTTP
//! and WebSocket boundaries.

pub mod api;
pub mod events;
pub mod models;

pub use models::{
    AttachmentMeta, ChatRoom, Message, MessageId, MessageType, ReadMarker, RoomId, RoomSummary,
    UNAVAILABLE_PLACEHOLDER, UnreadCount, User, UserId,
};
