use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, warn};
use vault_types::{
    AttachmentMeta, Message, MessageId, MessageType, RoomId, UNAVAILABLE_PLACEHOLDER, UserId,
};

use crate::models::{MESSAGE_COLUMNS, MessageRow};
use crate::rooms::query_room;
use crate::time::{from_sql, now, opt_from_sql, to_sql};
use crate::{ChatError, Database, Result, placeholders};

/// Largest accepted message body, in bytes of UTF-8.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// Everything needed to append one message to a room's log.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub chat_room_id: RoomId,
    pub sender_id: UserId,
    pub content: &'a str,
    pub message_type: MessageType,
    pub attachment: Option<AttachmentMeta>,
    pub reply_to_id: Option<MessageId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<'a> NewMessage<'a> {
    pub fn text(chat_room_id: RoomId, sender_id: UserId, content: &'a str) -> Self {
        Self {
            chat_room_id,
            sender_id,
            content,
            message_type: MessageType::Text,
            attachment: None,
            reply_to_id: None,
            expires_at: None,
        }
    }
}

impl Database {
    /// Seals `content` and appends it to the room's log. The returned message
    /// carries the plaintext plus the persisted id and timestamp.
    ///
    /// Participation is the caller's concern; this only checks the room exists.
    pub fn append_message(&self, new: NewMessage<'_>) -> Result<Message> {
        validate_body(&new.message_type, new.content, new.attachment.as_ref())?;

        let created_at = now();
        if let Some(expires_at) = new.expires_at {
            if expires_at <= created_at {
                return Err(ChatError::Validation("expiresAt must be in the future".into()));
            }
        }

        let sealed = self.codec.encrypt_text(new.content)?;
        // Hand back what will actually be read later. A body that does not
        // open again means the codec is misconfigured.
        let content = self.codec.decrypt_text(&sealed)?;

        let id = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_room(&tx, new.chat_room_id)?.is_none() {
                return Err(ChatError::NotFound("chat room"));
            }

            if let Some(reply_to_id) = new.reply_to_id {
                let target_room: Option<RoomId> = tx
                    .query_row(
                        "SELECT chat_room_id FROM messages WHERE id = ?1",
                        [reply_to_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                if target_room != Some(new.chat_room_id) {
                    return Err(ChatError::Validation(
                        "reply target is not a message in this room".into(),
                    ));
                }
            }

            let attachment = new.attachment.as_ref();
            let ts = to_sql(&created_at);
            tx.execute(
                "INSERT INTO messages (chat_room_id, sender_id, ciphertext, message_type,
                                       file_url, file_name, file_size, file_sha256,
                                       reply_to_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new.chat_room_id,
                    new.sender_id,
                    sealed,
                    new.message_type.as_str(),
                    attachment.map(|a| a.url.as_str()),
                    attachment.map(|a| a.name.as_str()),
                    attachment.map(|a| a.size),
                    attachment.and_then(|a| a.sha256.as_deref()),
                    new.reply_to_id,
                    ts,
                    new.expires_at.as_ref().map(to_sql),
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE chat_rooms SET updated_at = ?1 WHERE id = ?2",
                (&ts, new.chat_room_id),
            )?;

            tx.commit()?;
            Ok(id)
        })?;

        debug!("Message {} appended to room {}", id, new.chat_room_id);

        Ok(Message {
            id,
            chat_room_id: new.chat_room_id,
            sender_id: new.sender_id,
            content,
            message_type: new.message_type,
            attachment: new.attachment,
            reply_to_id: new.reply_to_id,
            created_at,
            edited_at: None,
            expires_at: new.expires_at,
            unavailable: false,
        })
    }

    /// Up to `limit` visible messages older than `before` (or the newest
    /// ones), returned oldest to newest. Pages are keyed by message id.
    pub fn list_messages(
        &self,
        chat_room_id: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let now = to_sql(&now());

        let rows = self.with_conn(|conn| {
            if query_room(conn, chat_room_id)?.is_none() {
                return Err(ChatError::NotFound("chat room"));
            }

            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_room_id = ?1
                   AND (?2 IS NULL OR id < ?2)
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY id DESC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![chat_room_id, before, now, limit], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(rows.into_iter().rev().map(|row| self.open_message(row)).collect())
    }

    /// Point lookup. Expired messages are treated as absent.
    pub fn get_message(&self, message_id: MessageId) -> Result<Option<Message>> {
        let row = self.with_conn(|conn| query_message(conn, message_id))?;
        Ok(row
            .map(|row| self.open_message(row))
            .filter(|m| !is_expired(m, &Utc::now())))
    }

    /// Replaces a message's content in place. Id, timestamps and ordering
    /// are untouched apart from stamping `edited_at`.
    pub fn edit_message(&self, message_id: MessageId, new_content: &str) -> Result<Message> {
        let current = self
            .get_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        validate_body(&current.message_type, new_content, current.attachment.as_ref())?;

        let sealed = self.codec.encrypt_text(new_content)?;
        let content = self.codec.decrypt_text(&sealed)?;
        let edited_at = now();

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET ciphertext = ?1, edited_at = ?2 WHERE id = ?3",
                params![sealed, to_sql(&edited_at), message_id],
            )?;
            if changed == 0 {
                return Err(ChatError::NotFound("message"));
            }
            Ok(())
        })?;

        Ok(Message {
            content,
            edited_at: Some(edited_at),
            unavailable: false,
            ..current
        })
    }

    /// Decrypts a stored row. A row that fails to open becomes a placeholder
    /// so it cannot take the rest of the page down with it.
    pub(crate) fn open_message(&self, row: MessageRow) -> Message {
        let (content, unavailable) = match self.codec.decrypt_text(&row.ciphertext) {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(
                    "Message {} in room {} could not be decrypted: {}",
                    row.id, row.chat_room_id, e
                );
                (UNAVAILABLE_PLACEHOLDER.to_string(), true)
            }
        };

        Message {
            id: row.id,
            chat_room_id: row.chat_room_id,
            sender_id: row.sender_id,
            content,
            message_type: row.message_type(),
            attachment: row.attachment(),
            reply_to_id: row.reply_to_id,
            created_at: from_sql(&row.created_at),
            edited_at: opt_from_sql(row.edited_at),
            expires_at: opt_from_sql(row.expires_at),
            unavailable,
        }
    }
}

fn validate_body(
    message_type: &MessageType,
    content: &str,
    attachment: Option<&AttachmentMeta>,
) -> Result<()> {
    if !message_type.is_well_formed() {
        return Err(ChatError::Validation(format!(
            "malformed message type '{}'",
            message_type
        )));
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(ChatError::Validation(format!(
            "content exceeds {} bytes",
            MAX_CONTENT_BYTES
        )));
    }

    match attachment {
        Some(a) if a.url.trim().is_empty() || a.size < 0 => {
            Err(ChatError::Validation("attachment needs a url and a non-negative size".into()))
        }
        Some(_) => Ok(()),
        None if message_type.requires_attachment() => Err(ChatError::Validation(format!(
            "{} messages need an attachment",
            message_type
        ))),
        None if content.trim().is_empty() => {
            Err(ChatError::Validation("content must not be empty".into()))
        }
        None => Ok(()),
    }
}

fn is_expired(message: &Message, now: &DateTime<Utc>) -> bool {
    message.expires_at.is_some_and(|at| at <= *now)
}

fn query_message(conn: &Connection, message_id: MessageId) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    Ok(conn
        .query_row(&sql, [message_id], MessageRow::from_row)
        .optional()?)
}

/// The newest visible message of each room in `room_ids`, in one query.
pub(crate) fn latest_message_rows(
    conn: &Connection,
    room_ids: &[RoomId],
    now: &str,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM messages
         WHERE id IN (
             SELECT MAX(id) FROM messages
             WHERE (expires_at IS NULL OR expires_at > ?1)
               AND chat_room_id IN ({})
             GROUP BY chat_room_id
         )",
        MESSAGE_COLUMNS,
        placeholders(room_ids.len())
    );

    let mut values = Vec::with_capacity(room_ids.len() + 1);
    values.push(Value::Text(now.to_string()));
    values.extend(room_ids.iter().map(|id| Value::Integer(*id)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), MessageRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::testing::{db, users};

    fn file_meta() -> AttachmentMeta {
        AttachmentMeta {
            url: "/files/abc".into(),
            name: "report.pdf".into(),
            size: 2048,
            sha256: None,
        }
    }

    #[test]
    fn append_returns_plaintext_but_stores_ciphertext() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        let message = db.append_message(NewMessage::text(room.id, ids[0], "hi there")).unwrap();
        assert_eq!(message.content, "hi there");
        assert_eq!(message.sender_id, ids[0]);

        let stored: Vec<u8> = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT ciphertext FROM messages WHERE id = ?1", [message.id], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert!(!stored.windows(8).any(|w| w == b"hi there"));
        assert_eq!(db.get_message(message.id).unwrap(), Some(message));
    }

    #[test]
    fn list_pages_by_id_oldest_first() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        let sent: Vec<MessageId> = (1..=5)
            .map(|i| {
                db.append_message(NewMessage::text(room.id, ids[0], &format!("m{}", i)))
                    .unwrap()
                    .id
            })
            .collect();

        let newest: Vec<MessageId> = db.list_messages(room.id, 2, None).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(newest, &sent[3..]);

        let older: Vec<MessageId> = db
            .list_messages(room.id, 2, Some(sent[3]))
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(older, &sent[1..3]);

        assert!(matches!(db.list_messages(404, 10, None), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn concurrent_appends_keep_strict_order() {
        let db = Arc::new(db());
        let ids = users(&db, 4);
        let room_id = db.create_room(Some("busy"), true, ids[0], &ids).unwrap().id;

        let handles: Vec<_> = ids
            .iter()
            .map(|&sender| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for i in 0..25 {
                        db.append_message(NewMessage::text(room_id, sender, &format!("{}:{}", sender, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = db.list_messages(room_id, 200, None).unwrap();
        assert_eq!(all.len(), 100);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        // Each sender's own messages appear in the order they were sent.
        for &sender in &ids {
            let seq: Vec<u32> = all
                .iter()
                .filter(|m| m.sender_id == sender)
                .map(|m| m.content.split(':').nth(1).unwrap().parse().unwrap())
                .collect();
            assert_eq!(seq, (0..25).collect::<Vec<_>>());
        }
    }

    #[test]
    fn corrupt_row_becomes_placeholder_without_hiding_the_page() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        let first = db.append_message(NewMessage::text(room.id, ids[0], "one")).unwrap();
        let broken = db.append_message(NewMessage::text(room.id, ids[1], "two")).unwrap();
        let last = db.append_message(NewMessage::text(room.id, ids[0], "three")).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET ciphertext = X'00010203' WHERE id = ?1",
                [broken.id],
            )?;
            Ok(())
        })
        .unwrap();

        let page = db.list_messages(room.id, 10, None).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, first.content);
        assert!(page[1].unavailable);
        assert_eq!(page[1].content, UNAVAILABLE_PLACEHOLDER);
        assert_eq!(page[2].content, last.content);
        assert!(!page[2].unavailable);
    }

    #[test]
    fn rejects_malformed_messages() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        let bad_tag = NewMessage {
            message_type: MessageType::from("Not Valid"),
            ..NewMessage::text(room.id, ids[0], "x")
        };
        assert!(matches!(db.append_message(bad_tag), Err(ChatError::Validation(_))));

        assert!(matches!(
            db.append_message(NewMessage::text(room.id, ids[0], "  ")),
            Err(ChatError::Validation(_))
        ));

        let huge = "a".repeat(MAX_CONTENT_BYTES + 1);
        assert!(matches!(
            db.append_message(NewMessage::text(room.id, ids[0], &huge)),
            Err(ChatError::Validation(_))
        ));

        let file_without_meta = NewMessage {
            message_type: MessageType::File,
            ..NewMessage::text(room.id, ids[0], "")
        };
        assert!(matches!(db.append_message(file_without_meta), Err(ChatError::Validation(_))));

        let already_expired = NewMessage {
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..NewMessage::text(room.id, ids[0], "late")
        };
        assert!(matches!(db.append_message(already_expired), Err(ChatError::Validation(_))));

        assert!(matches!(
            db.append_message(NewMessage::text(404, ids[0], "lost")),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn attachments_and_unknown_types_round_trip() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        let file = db
            .append_message(NewMessage {
                message_type: MessageType::File,
                attachment: Some(file_meta()),
                ..NewMessage::text(room.id, ids[0], "")
            })
            .unwrap();
        let custom = db
            .append_message(NewMessage {
                message_type: MessageType::from("location_share"),
                ..NewMessage::text(room.id, ids[1], "52.52,13.40")
            })
            .unwrap();

        let page = db.list_messages(room.id, 10, None).unwrap();
        assert_eq!(page[0].id, file.id);
        assert_eq!(page[0].attachment, Some(file_meta()));
        assert_eq!(page[1].id, custom.id);
        assert_eq!(page[1].message_type, MessageType::Other("location_share".into()));
    }

    #[test]
    fn reply_must_stay_in_room() {
        let db = db();
        let ids = users(&db, 3);
        let room = db.create_room(None, false, ids[0], &ids[..2]).unwrap();
        let other = db.create_room(None, false, ids[0], &[ids[0], ids[2]]).unwrap();

        let original = db.append_message(NewMessage::text(room.id, ids[0], "question")).unwrap();
        let reply = db
            .append_message(NewMessage {
                reply_to_id: Some(original.id),
                ..NewMessage::text(room.id, ids[1], "answer")
            })
            .unwrap();
        assert_eq!(reply.reply_to_id, Some(original.id));

        let crossed = NewMessage {
            reply_to_id: Some(original.id),
            ..NewMessage::text(other.id, ids[2], "wrong room")
        };
        assert!(matches!(db.append_message(crossed), Err(ChatError::Validation(_))));
    }

    #[test]
    fn expired_messages_disappear_from_reads() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        db.append_message(NewMessage::text(room.id, ids[0], "stays")).unwrap();
        let boom = db
            .append_message(NewMessage {
                message_type: MessageType::Boom,
                expires_at: Some(Utc::now() + chrono::Duration::milliseconds(50)),
                ..NewMessage::text(room.id, ids[0], "self destructs")
            })
            .unwrap();
        assert_eq!(db.list_messages(room.id, 10, None).unwrap().len(), 2);

        thread::sleep(Duration::from_millis(80));

        let page = db.list_messages(room.id, 10, None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "stays");
        assert_eq!(db.get_message(boom.id).unwrap(), None);
        let preview = db.list_rooms_for(ids[1]).unwrap();
        assert_eq!(preview[0].last_message.as_ref().unwrap().content, "stays");
    }

    #[test]
    fn edit_replaces_content_only() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();
        let before = db.append_message(NewMessage::text(room.id, ids[0], "teh typo")).unwrap();
        let after_it = db.append_message(NewMessage::text(room.id, ids[1], "lol")).unwrap();

        let edited = db.edit_message(before.id, "the typo").unwrap();
        assert_eq!(edited.id, before.id);
        assert_eq!(edited.created_at, before.created_at);
        assert!(edited.edited_at.is_some());

        let page = db.list_messages(room.id, 10, None).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![before.id, after_it.id]);
        assert_eq!(page[0].content, "the typo");

        assert!(matches!(db.edit_message(9999, "x"), Err(ChatError::NotFound(_))));
    }
}
