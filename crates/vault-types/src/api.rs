use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AttachmentMeta, MessageId, MessageType, UserId};

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Other participants. The caller is added if absent.
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub is_pinned: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddParticipantsRequest {
    pub user_ids: Vec<UserId>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    /// May be empty for attachment-carrying types
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub attachment: Option<AttachmentMeta>,
    pub reply_to_id: Option<MessageId>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Read tracking --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    pub last_message_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    /// False when the marker was already at or past `last_message_id`.
    pub advanced: bool,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
