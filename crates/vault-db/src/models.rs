//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the vault-types models so the DB layer stays independent.

use rusqlite::Row;
use vault_types::{AttachmentMeta, ChatRoom, MessageType, User};

use crate::time::{from_sql, opt_from_sql};

pub const USER_COLUMNS: &str = "id, username, display_name, is_online, last_seen";

pub const ROOM_COLUMNS: &str = "id, name, is_group, is_pinned, created_by, created_at, updated_at";

pub const MESSAGE_COLUMNS: &str = "id, chat_room_id, sender_id, ciphertext, message_type, \
     file_url, file_name, file_size, file_sha256, reply_to_id, created_at, edited_at, expires_at";

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

pub struct RoomRow {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub is_pinned: bool,
    pub created_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored message. `ciphertext` is the sealed body; it is only opened by
/// `Database::open_message`.
pub struct MessageRow {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub ciphertext: Vec<u8>,
    pub message_type: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_sha256: Option<String>,
    pub reply_to_id: Option<i64>,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub expires_at: Option<String>,
}

impl UserRow {
    /// Reads [`USER_COLUMNS`] starting at column `offset`.
    pub fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            username: row.get(offset + 1)?,
            display_name: row.get(offset + 2)?,
            is_online: row.get(offset + 3)?,
            last_seen: row.get(offset + 4)?,
        })
    }

    pub fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            display_name: self.display_name,
            is_online: self.is_online,
            last_seen: opt_from_sql(self.last_seen),
        }
    }
}

impl RoomRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_group: row.get(2)?,
            is_pinned: row.get(3)?,
            created_by: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn into_room(self) -> ChatRoom {
        ChatRoom {
            id: self.id,
            name: self.name,
            is_group: self.is_group,
            is_pinned: self.is_pinned,
            created_by: self.created_by,
            created_at: from_sql(&self.created_at),
            updated_at: from_sql(&self.updated_at),
        }
    }
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chat_room_id: row.get(1)?,
            sender_id: row.get(2)?,
            ciphertext: row.get(3)?,
            message_type: row.get(4)?,
            file_url: row.get(5)?,
            file_name: row.get(6)?,
            file_size: row.get(7)?,
            file_sha256: row.get(8)?,
            reply_to_id: row.get(9)?,
            created_at: row.get(10)?,
            edited_at: row.get(11)?,
            expires_at: row.get(12)?,
        })
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.message_type.as_str())
    }

    /// Attachment columns are written together; a row with a URL has all of them.
    pub fn attachment(&self) -> Option<AttachmentMeta> {
        let url = self.file_url.clone()?;
        Some(AttachmentMeta {
            url,
            name: self.file_name.clone().unwrap_or_default(),
            size: self.file_size.unwrap_or(0),
            sha256: self.file_sha256.clone(),
        })
    }
}
