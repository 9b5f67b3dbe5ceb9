use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type UserId = i64;
pub type RoomId = i64;
pub type MessageId = i64;

/// Content shown in place of a stored message whose ciphertext could not be
/// decrypted.
pub const UNAVAILABLE_PLACEHOLDER: &str = "message unavailable";

/// Longest accepted message type tag.
pub const MAX_TYPE_TAG_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: Option<String>,
    pub is_group: bool,
    pub is_pinned: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A room as seen from one participant's room list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    /// Stored name, or the other participant's display name for 1:1 rooms.
    pub display_name: String,
    pub participants: Vec<User>,
    pub last_message: Option<Message>,
}

/// Message kind tag. Open-ended: tags the core does not know about are
/// carried through untouched as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    Text,
    File,
    Voice,
    Poll,
    System,
    Boom,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Voice => "voice",
            Self::Poll => "poll",
            Self::System => "system",
            Self::Boom => "boom",
            Self::Other(tag) => tag,
        }
    }

    /// Whether a message of this type must carry attachment metadata.
    pub fn requires_attachment(&self) -> bool {
        matches!(self, Self::File | Self::Voice)
    }

    /// Tags are short lowercase identifiers: `[a-z0-9_]{1,32}`.
    pub fn is_well_formed(&self) -> bool {
        let tag = self.as_str();
        !tag.is_empty()
            && tag.len() <= MAX_TYPE_TAG_LEN
            && tag
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "file" => Self::File,
            "voice" => Self::Voice,
            "poll" => Self::Poll,
            "system" => Self::System,
            "boom" => Self::Boom,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub url: String,
    pub name: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// A message with its content in plaintext. Content is only ever plaintext
/// in memory; the store keeps ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<AttachmentMeta>,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the stored ciphertext failed to decrypt; `content` then holds
    /// [`UNAVAILABLE_PLACEHOLDER`].
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub user_id: UserId,
    pub chat_room_id: RoomId,
    pub last_read_message_id: MessageId,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub chat_room_id: RoomId,
    pub count: u64,
}
