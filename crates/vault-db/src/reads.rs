use rusqlite::OptionalExtension;
use tracing::debug;
use vault_types::{MessageId, ReadMarker, RoomId, UnreadCount, UserId};

use crate::rooms::{is_member, query_room};
use crate::time::{from_sql, now, to_sql};
use crate::{ChatError, Database, Result};

impl Database {
    /// Advances the user's read marker for a room to `last_message_id`.
    /// Markers never move backwards; returns whether this call moved it.
    pub fn mark_read(&self, user_id: UserId, chat_room_id: RoomId, last_message_id: MessageId) -> Result<bool> {
        let ts = to_sql(&now());

        let advanced = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_room(&tx, chat_room_id)?.is_none() {
                return Err(ChatError::NotFound("chat room"));
            }
            if !is_member(&tx, chat_room_id, user_id)? {
                return Err(ChatError::NotAuthorized("not a participant of this room".into()));
            }
            let in_room = tx
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND chat_room_id = ?2",
                    (last_message_id, chat_room_id),
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !in_room {
                return Err(ChatError::NotFound("message"));
            }

            // The WHERE on the update arm keeps the marker at the maximum
            // no matter how concurrent calls interleave.
            let changed = tx.execute(
                "INSERT INTO read_markers (user_id, chat_room_id, last_read_message_id, last_read_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, chat_room_id) DO UPDATE SET
                     last_read_message_id = excluded.last_read_message_id,
                     last_read_at = excluded.last_read_at
                 WHERE excluded.last_read_message_id > read_markers.last_read_message_id",
                (user_id, chat_room_id, last_message_id, &ts),
            )?;

            tx.commit()?;
            Ok(changed > 0)
        })?;

        debug!(
            "Read marker for {} in room {} at {} (advanced: {})",
            user_id, chat_room_id, last_message_id, advanced
        );
        Ok(advanced)
    }

    pub fn read_marker(&self, user_id: UserId, chat_room_id: RoomId) -> Result<Option<ReadMarker>> {
        self.with_conn(|conn| {
            let marker = conn
                .query_row(
                    "SELECT user_id, chat_room_id, last_read_message_id, last_read_at
                     FROM read_markers WHERE user_id = ?1 AND chat_room_id = ?2",
                    (user_id, chat_room_id),
                    |row| {
                        Ok(ReadMarker {
                            user_id: row.get(0)?,
                            chat_room_id: row.get(1)?,
                            last_read_message_id: row.get(2)?,
                            last_read_at: from_sql(&row.get::<_, String>(3)?),
                        })
                    },
                )
                .optional()?;
            Ok(marker)
        })
    }

    /// Unread message counts for every room the user is in. The user's own
    /// messages never count, and rooms with nothing unread are left out.
    pub fn unread_counts_for(&self, user_id: UserId) -> Result<Vec<UnreadCount>> {
        let now = to_sql(&now());

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.chat_room_id, COUNT(m.id)
                 FROM chat_participants p
                 LEFT JOIN read_markers rm
                     ON rm.user_id = p.user_id AND rm.chat_room_id = p.chat_room_id
                 JOIN messages m
                     ON m.chat_room_id = p.chat_room_id
                    AND m.id > COALESCE(rm.last_read_message_id, 0)
                    AND m.sender_id != p.user_id
                    AND (m.expires_at IS NULL OR m.expires_at > ?2)
                 WHERE p.user_id = ?1
                 GROUP BY p.chat_room_id
                 HAVING COUNT(m.id) > 0
                 ORDER BY p.chat_room_id",
            )?;
            let counts = stmt
                .query_map((user_id, &now), |row| {
                    Ok(UnreadCount {
                        chat_room_id: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(counts)
        })
    }
}
