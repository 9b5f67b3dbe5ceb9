use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, params_from_iter};
use tracing::info;
use vault_types::{ChatRoom, Message, RoomId, RoomSummary, User, UserId};

use crate::messages::latest_message_rows;
use crate::models::{ROOM_COLUMNS, RoomRow, USER_COLUMNS, UserRow};
use crate::time::{now, to_sql};
use crate::users::missing_users;
use crate::{ChatError, Database, Result, placeholders};

pub const MAX_ROOM_NAME_LEN: usize = 100;

impl Database {
    /// Creates a room and all of its membership edges in one transaction.
    /// Either every edge exists afterwards or the room does not.
    pub fn create_room(
        &self,
        name: Option<&str>,
        is_group: bool,
        creator_id: UserId,
        participant_ids: &[UserId],
    ) -> Result<ChatRoom> {
        let name = validate_new_room(name, is_group, creator_id, participant_ids)?;

        let room = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let room = insert_room(&tx, name.as_deref(), is_group, creator_id, participant_ids)?;
            tx.commit()?;
            Ok(room)
        })?;

        info!(
            "Room {} created by {} with {} participants",
            room.id,
            creator_id,
            participant_ids.len()
        );
        Ok(room)
    }

    /// The 1:1 room between `creator_id` and `other_id`, created if the pair
    /// has none yet. The lookup and the insert share one transaction, so
    /// concurrent calls for the same pair end up with a single room. The flag
    /// is true when this call created it.
    pub fn open_direct_room(&self, creator_id: UserId, other_id: UserId) -> Result<(ChatRoom, bool)> {
        let participant_ids = [creator_id, other_id];
        validate_new_room(None, false, creator_id, &participant_ids)?;

        let (room, created) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(existing) = query_direct_room(&tx, creator_id, other_id)? {
                return Ok((existing, false));
            }
            let room = insert_room(&tx, None, false, creator_id, &participant_ids)?;
            tx.commit()?;
            Ok((room, true))
        })?;

        if created {
            info!("Direct room {} created between {} and {}", room.id, creator_id, other_id);
        }
        Ok((room, created))
    }

    pub fn get_room(&self, chat_room_id: RoomId) -> Result<ChatRoom> {
        self.with_conn(|conn| query_room(conn, chat_room_id)?.ok_or(ChatError::NotFound("chat room")))
    }

    /// The room, if `user_id` is one of its participants. A missing room is
    /// `NotFound`; an existing room the user is not in is `NotAuthorized`.
    pub fn require_participant(&self, chat_room_id: RoomId, user_id: UserId) -> Result<ChatRoom> {
        self.with_conn(|conn| {
            let room = query_room(conn, chat_room_id)?.ok_or(ChatError::NotFound("chat room"))?;
            if !is_member(conn, chat_room_id, user_id)? {
                return Err(ChatError::NotAuthorized("not a participant of this room".into()));
            }
            Ok(room)
        })
    }

    /// Authoritative membership, read from the participant rows at call time.
    pub fn participants_of(&self, chat_room_id: RoomId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            if query_room(conn, chat_room_id)?.is_none() {
                return Err(ChatError::NotFound("chat room"));
            }
            member_ids(conn, chat_room_id)
        })
    }

    /// Rooms `user_id` belongs to, pinned first and then most recently
    /// active, each with its participants and latest visible message.
    ///
    /// Three queries regardless of room count: rooms, all participants of
    /// those rooms, and the newest message per room.
    pub fn list_rooms_for(&self, user_id: UserId) -> Result<Vec<RoomSummary>> {
        let now = to_sql(&now());

        let (rooms, mut participants, last_rows) = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.is_group, r.is_pinned, r.created_by, r.created_at, r.updated_at
                 FROM chat_rooms r
                 JOIN chat_participants p ON p.chat_room_id = r.id
                 WHERE p.user_id = ?1
                 ORDER BY r.is_pinned DESC, r.updated_at DESC, r.id DESC",
            )?;
            let rooms = stmt
                .query_map([user_id], RoomRow::from_row)?
                .map(|row| row.map(RoomRow::into_room))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if rooms.is_empty() {
                return Ok((rooms, HashMap::new(), Vec::new()));
            }

            let room_ids: Vec<RoomId> = rooms.iter().map(|r| r.id).collect();
            let participants = participants_by_room(conn, &room_ids)?;
            let last_rows = latest_message_rows(conn, &room_ids, &now)?;

            Ok((rooms, participants, last_rows))
        })?;

        // Decrypt after the connection lock is released.
        let mut last_messages: HashMap<RoomId, Message> = last_rows
            .into_iter()
            .map(|row| {
                let message = self.open_message(row);
                (message.chat_room_id, message)
            })
            .collect();

        Ok(rooms
            .into_iter()
            .map(|room| {
                let participants = participants.remove(&room.id).unwrap_or_default();
                let display_name = display_name_for(&room, &participants, user_id);
                let last_message = last_messages.remove(&room.id);
                RoomSummary {
                    room,
                    display_name,
                    participants,
                    last_message,
                }
            })
            .collect())
    }

    /// Deletes a room on behalf of its creator. Participant edges, messages
    /// and read markers go with it. Returns the former participants so the
    /// caller can notify them.
    pub fn delete_room(&self, chat_room_id: RoomId, requester_id: UserId) -> Result<Vec<UserId>> {
        let former = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let room = query_room(&tx, chat_room_id)?.ok_or(ChatError::NotFound("chat room"))?;
            if room.created_by != requester_id {
                return Err(ChatError::NotAuthorized("only the creator can delete a room".into()));
            }

            let former = member_ids(&tx, chat_room_id)?;
            tx.execute("DELETE FROM chat_rooms WHERE id = ?1", [chat_room_id])?;
            tx.commit()?;
            Ok(former)
        })?;

        info!("Room {} deleted by {}", chat_room_id, requester_id);
        Ok(former)
    }

    /// Rename and/or pin a room. Any participant may do this; only group
    /// rooms carry a stored name.
    pub fn update_room(
        &self,
        chat_room_id: RoomId,
        requester_id: UserId,
        name: Option<&str>,
        is_pinned: Option<bool>,
    ) -> Result<ChatRoom> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let room = query_room(&tx, chat_room_id)?.ok_or(ChatError::NotFound("chat room"))?;
            if !is_member(&tx, chat_room_id, requester_id)? {
                return Err(ChatError::NotAuthorized("not a participant of this room".into()));
            }

            if let Some(name) = name {
                if !room.is_group {
                    return Err(ChatError::Validation(
                        "1:1 rooms are named after the other participant".into(),
                    ));
                }
                let name = normalize_name(Some(name))?
                    .ok_or_else(|| ChatError::Validation("group rooms need a name".into()))?;
                tx.execute("UPDATE chat_rooms SET name = ?1 WHERE id = ?2", (name, chat_room_id))?;
            }

            if let Some(is_pinned) = is_pinned {
                tx.execute(
                    "UPDATE chat_rooms SET is_pinned = ?1 WHERE id = ?2",
                    (is_pinned, chat_room_id),
                )?;
            }

            let room = query_room(&tx, chat_room_id)?.ok_or(ChatError::NotFound("chat room"))?;
            tx.commit()?;
            Ok(room)
        })
    }

    /// Invite users into a group room. The requester must already be in it.
    pub fn add_participants(
        &self,
        chat_room_id: RoomId,
        requester_id: UserId,
        user_ids: &[UserId],
    ) -> Result<ChatRoom> {
        if user_ids.is_empty() {
            return Err(ChatError::InvalidMembership("no users to add".into()));
        }
        if user_ids.iter().collect::<HashSet<_>>().len() != user_ids.len() {
            return Err(ChatError::InvalidMembership("duplicate participant".into()));
        }

        let room = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let room = query_room(&tx, chat_room_id)?.ok_or(ChatError::NotFound("chat room"))?;
            if !is_member(&tx, chat_room_id, requester_id)? {
                return Err(ChatError::NotAuthorized("not a participant of this room".into()));
            }
            if !room.is_group {
                return Err(ChatError::InvalidMembership(
                    "a 1:1 room has exactly 2 participants".into(),
                ));
            }

            let current = member_ids(&tx, chat_room_id)?;
            if let Some(existing) = user_ids.iter().find(|id| current.contains(id)) {
                return Err(ChatError::InvalidMembership(format!(
                    "user {} is already a participant",
                    existing
                )));
            }

            let missing = missing_users(&tx, user_ids)?;
            if !missing.is_empty() {
                return Err(ChatError::InvalidMembership(format!("unknown users {:?}", missing)));
            }

            insert_participants(&tx, chat_room_id, user_ids, &to_sql(&now()))?;
            tx.commit()?;
            Ok(room)
        })?;

        info!("{} added {:?} to room {}", requester_id, user_ids, chat_room_id);
        Ok(room)
    }

    /// Remove `user_id` from a room along with their read marker. Refused if
    /// fewer than 2 participants would remain; such rooms are deleted instead.
    pub fn leave_room(&self, chat_room_id: RoomId, user_id: UserId) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_room(&tx, chat_room_id)?.is_none() {
                return Err(ChatError::NotFound("chat room"));
            }
            let members = member_ids(&tx, chat_room_id)?;
            if !members.contains(&user_id) {
                return Err(ChatError::NotAuthorized("not a participant of this room".into()));
            }
            if members.len() <= 2 {
                return Err(ChatError::InvalidMembership(
                    "a room needs at least 2 participants; delete it instead".into(),
                ));
            }

            tx.execute(
                "DELETE FROM chat_participants WHERE chat_room_id = ?1 AND user_id = ?2",
                (chat_room_id, user_id),
            )?;
            tx.execute(
                "DELETE FROM read_markers WHERE chat_room_id = ?1 AND user_id = ?2",
                (chat_room_id, user_id),
            )?;
            tx.commit()?;
            Ok(())
        })?;

        info!("{} left room {}", user_id, chat_room_id);
        Ok(())
    }

    /// Every user who shares at least one room with `user_id`, excluding them.
    pub fn co_participants(&self, user_id: UserId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT other.user_id
                 FROM chat_participants mine
                 JOIN chat_participants other ON other.chat_room_id = mine.chat_room_id
                 WHERE mine.user_id = ?1 AND other.user_id != ?1
                 ORDER BY other.user_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, UserId>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn validate_new_room(
    name: Option<&str>,
    is_group: bool,
    creator_id: UserId,
    participant_ids: &[UserId],
) -> Result<Option<String>> {
    if participant_ids.len() < 2 {
        return Err(ChatError::InvalidMembership(
            "a room needs at least 2 participants".into(),
        ));
    }
    let unique: HashSet<&UserId> = participant_ids.iter().collect();
    if unique.len() != participant_ids.len() {
        return Err(ChatError::InvalidMembership("duplicate participant".into()));
    }
    if !unique.contains(&creator_id) {
        return Err(ChatError::InvalidMembership("the creator must be a participant".into()));
    }
    if !is_group && participant_ids.len() != 2 {
        return Err(ChatError::InvalidMembership(
            "a 1:1 room has exactly 2 participants".into(),
        ));
    }

    if !is_group {
        return Ok(None);
    }
    normalize_name(name)?
        .map(Some)
        .ok_or_else(|| ChatError::Validation("group rooms need a name".into()))
}

fn normalize_name(name: Option<&str>) -> Result<Option<String>> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_ROOM_NAME_LEN {
        return Err(ChatError::Validation(format!(
            "room name is longer than {} characters",
            MAX_ROOM_NAME_LEN
        )));
    }
    Ok(Some(name.to_string()))
}

fn display_name_for(room: &ChatRoom, participants: &[User], viewer: UserId) -> String {
    if let Some(name) = &room.name {
        return name.clone();
    }
    participants
        .iter()
        .find(|u| u.id != viewer)
        .map(|u| u.display_name.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn insert_room(
    conn: &Connection,
    name: Option<&str>,
    is_group: bool,
    creator_id: UserId,
    participant_ids: &[UserId],
) -> Result<ChatRoom> {
    let missing = missing_users(conn, participant_ids)?;
    if !missing.is_empty() {
        return Err(ChatError::InvalidMembership(format!("unknown users {:?}", missing)));
    }

    let ts = to_sql(&now());
    conn.execute(
        "INSERT INTO chat_rooms (name, is_group, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        (name, is_group, creator_id, &ts),
    )?;
    let room_id = conn.last_insert_rowid();

    insert_participants(conn, room_id, participant_ids, &ts)?;

    query_room(conn, room_id)?.ok_or(ChatError::NotFound("chat room"))
}

fn query_direct_room(conn: &Connection, a: UserId, b: UserId) -> Result<Option<ChatRoom>> {
    let sql = format!(
        "SELECT {} FROM chat_rooms r
         WHERE r.is_group = 0
           AND EXISTS (SELECT 1 FROM chat_participants WHERE chat_room_id = r.id AND user_id = ?1)
           AND EXISTS (SELECT 1 FROM chat_participants WHERE chat_room_id = r.id AND user_id = ?2)
         ORDER BY r.id
         LIMIT 1",
        ROOM_COLUMNS
    );
    let row = conn.query_row(&sql, (a, b), RoomRow::from_row).optional()?;
    Ok(row.map(RoomRow::into_room))
}

fn insert_participants(conn: &Connection, chat_room_id: RoomId, user_ids: &[UserId], ts: &str) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO chat_participants (chat_room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
    )?;
    for user_id in user_ids {
        stmt.execute((chat_room_id, user_id, ts))?;
    }
    Ok(())
}

pub(crate) fn query_room(conn: &Connection, chat_room_id: RoomId) -> Result<Option<ChatRoom>> {
    let sql = format!("SELECT {} FROM chat_rooms WHERE id = ?1", ROOM_COLUMNS);
    let row = conn.query_row(&sql, [chat_room_id], RoomRow::from_row).optional()?;
    Ok(row.map(RoomRow::into_room))
}

pub(crate) fn is_member(conn: &Connection, chat_room_id: RoomId, user_id: UserId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_participants WHERE chat_room_id = ?1 AND user_id = ?2",
            (chat_room_id, user_id),
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn member_ids(conn: &Connection, chat_room_id: RoomId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_participants WHERE chat_room_id = ?1 ORDER BY user_id",
    )?;
    let ids = stmt
        .query_map([chat_room_id], |row| row.get::<_, UserId>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Batch-fetch participants (with profiles) for a set of rooms.
fn participants_by_room(conn: &Connection, room_ids: &[RoomId]) -> Result<HashMap<RoomId, Vec<User>>> {
    let sql = format!(
        "SELECT p.chat_room_id, {}
         FROM chat_participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.chat_room_id IN ({})
         ORDER BY p.chat_room_id, u.id",
        USER_COLUMNS
            .split(", ")
            .map(|c| format!("u.{}", c))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders(room_ids.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(room_ids), |row| {
            Ok((row.get::<_, RoomId>(0)?, UserRow::from_row_at(row, 1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_room: HashMap<RoomId, Vec<User>> = HashMap::new();
    for (room_id, user) in rows {
        by_room.entry(room_id).or_default().push(user.into_user());
    }
    Ok(by_room)
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::NewMessage;
    use crate::testing::{db, users};

    #[test]
    fn creates_one_to_one_room() {
        let db = db();
        let ids = users(&db, 2);

        let room = db.create_room(Some("ignored"), false, ids[0], &ids).unwrap();
        assert!(!room.is_group);
        assert_eq!(room.name, None);
        assert_eq!(room.created_by, ids[0]);
        assert_eq!(db.participants_of(room.id).unwrap(), ids);
    }

    #[test]
    fn rejects_bad_membership() {
        let db = db();
        let ids = users(&db, 3);

        let too_few = db.create_room(None, false, ids[0], &ids[..1]);
        assert!(matches!(too_few, Err(ChatError::InvalidMembership(_))));

        let duplicate = db.create_room(Some("g"), true, ids[0], &[ids[0], ids[1], ids[1]]);
        assert!(matches!(duplicate, Err(ChatError::InvalidMembership(_))));

        let direct_with_three = db.create_room(None, false, ids[0], &ids);
        assert!(matches!(direct_with_three, Err(ChatError::InvalidMembership(_))));

        let creator_outside = db.create_room(Some("g"), true, ids[2], &ids[..2]);
        assert!(matches!(creator_outside, Err(ChatError::InvalidMembership(_))));

        let unknown_user = db.create_room(None, false, ids[0], &[ids[0], 999]);
        assert!(matches!(unknown_user, Err(ChatError::InvalidMembership(_))));

        let unnamed_group = db.create_room(Some("   "), true, ids[0], &ids);
        assert!(matches!(unnamed_group, Err(ChatError::Validation(_))));
    }

    #[test]
    fn failed_edge_insert_leaves_no_room() {
        let db = db();
        let ids = users(&db, 3);

        // Make the third edge insert fail after the room row is written.
        db.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TRIGGER fail_edge BEFORE INSERT ON chat_participants
                 WHEN NEW.user_id = {}
                 BEGIN SELECT RAISE(ABORT, 'edge insert failed'); END;",
                ids[2]
            ))?;
            Ok(())
        })
        .unwrap();

        let result = db.create_room(Some("doomed"), true, ids[0], &ids);
        assert!(matches!(result, Err(ChatError::Storage(_))));

        let (rooms, edges): (i64, i64) = db
            .with_conn(|conn| {
                Ok((
                    conn.query_row("SELECT COUNT(*) FROM chat_rooms", [], |r| r.get(0))?,
                    conn.query_row("SELECT COUNT(*) FROM chat_participants", [], |r| r.get(0))?,
                ))
            })
            .unwrap();
        assert_eq!((rooms, edges), (0, 0));
        assert!(db.list_rooms_for(ids[0]).unwrap().is_empty());
    }

    #[test]
    fn missing_room_is_not_found_and_outsider_is_not_authorized() {
        let db = db();
        let ids = users(&db, 3);
        let room = db.create_room(None, false, ids[0], &ids[..2]).unwrap();

        assert!(matches!(db.get_room(404), Err(ChatError::NotFound("chat room"))));
        assert!(matches!(db.participants_of(404), Err(ChatError::NotFound(_))));
        assert!(matches!(
            db.require_participant(room.id, ids[2]),
            Err(ChatError::NotAuthorized(_))
        ));
        assert_eq!(db.require_participant(room.id, ids[1]).unwrap().id, room.id);
    }

    #[test]
    fn list_orders_pinned_then_recent_activity() {
        let db = db();
        let ids = users(&db, 3);

        let older = db.create_room(Some("older"), true, ids[0], &ids).unwrap();
        sleep(Duration::from_millis(5));
        let newer = db.create_room(None, false, ids[0], &ids[..2]).unwrap();
        sleep(Duration::from_millis(5));
        let pinned = db.create_room(None, false, ids[0], &[ids[0], ids[2]]).unwrap();
        db.update_room(pinned.id, ids[0], None, Some(true)).unwrap();

        let order: Vec<RoomId> = db.list_rooms_for(ids[0]).unwrap().iter().map(|s| s.room.id).collect();
        assert_eq!(order, vec![pinned.id, newer.id, older.id]);

        // New activity in the older room moves it ahead of the unpinned one.
        sleep(Duration::from_millis(5));
        db.append_message(NewMessage::text(older.id, ids[1], "bump")).unwrap();
        let order: Vec<RoomId> = db.list_rooms_for(ids[0]).unwrap().iter().map(|s| s.room.id).collect();
        assert_eq!(order, vec![pinned.id, older.id, newer.id]);
    }

    #[test]
    fn list_includes_participants_preview_and_display_name() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();

        db.append_message(NewMessage::text(room.id, ids[0], "first")).unwrap();
        db.append_message(NewMessage::text(room.id, ids[1], "latest")).unwrap();

        let summaries = db.list_rooms_for(ids[0]).unwrap();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.display_name, "User 2");
        assert_eq!(summary.participants.len(), 2);
        let last = summary.last_message.as_ref().unwrap();
        assert_eq!(last.content, "latest");
        assert_eq!(last.sender_id, ids[1]);

        let from_other_side = db.list_rooms_for(ids[1]).unwrap();
        assert_eq!(from_other_side[0].display_name, "User 1");
    }

    #[test]
    fn only_creator_deletes_and_deletion_cascades() {
        let db = db();
        let ids = users(&db, 2);
        let room = db.create_room(None, false, ids[0], &ids).unwrap();
        db.append_message(NewMessage::text(room.id, ids[0], "hello")).unwrap();

        assert!(matches!(db.delete_room(room.id, ids[1]), Err(ChatError::NotAuthorized(_))));
        assert!(matches!(db.delete_room(404, ids[0]), Err(ChatError::NotFound(_))));

        let former = db.delete_room(room.id, ids[0]).unwrap();
        assert_eq!(former, ids);
        assert!(matches!(db.get_room(room.id), Err(ChatError::NotFound(_))));
        assert!(db.list_rooms_for(ids[1]).unwrap().is_empty());

        let leftover: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn rename_rules_follow_room_kind() {
        let db = db();
        let ids = users(&db, 3);
        let group = db.create_room(Some("team"), true, ids[0], &ids).unwrap();
        let direct = db.create_room(None, false, ids[0], &ids[..2]).unwrap();

        let renamed = db.update_room(group.id, ids[1], Some("  squad "), None).unwrap();
        assert_eq!(renamed.name.as_deref(), Some("squad"));

        assert!(matches!(
            db.update_room(direct.id, ids[0], Some("nope"), None),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            db.update_room(direct.id, ids[2], None, Some(true)),
            Err(ChatError::NotAuthorized(_))
        ));
    }

    #[test]
    fn add_and_leave_participants() {
        let db = db();
        let ids = users(&db, 4);
        let group = db.create_room(Some("team"), true, ids[0], &ids[..3]).unwrap();

        db.add_participants(group.id, ids[1], &[ids[3]]).unwrap();
        assert_eq!(db.participants_of(group.id).unwrap(), ids);

        assert!(matches!(
            db.add_participants(group.id, ids[0], &[ids[3]]),
            Err(ChatError::InvalidMembership(_))
        ));

        db.leave_room(group.id, ids[3]).unwrap();
        db.leave_room(group.id, ids[2]).unwrap();
        assert_eq!(db.participants_of(group.id).unwrap(), &ids[..2]);

        // Two left: leaving would break the room invariant.
        assert!(matches!(
            db.leave_room(group.id, ids[1]),
            Err(ChatError::InvalidMembership(_))
        ));
        assert!(matches!(
            db.leave_room(group.id, ids[3]),
            Err(ChatError::NotAuthorized(_))
        ));
    }

    #[test]
    fn direct_rooms_cannot_grow() {
        let db = db();
        let ids = users(&db, 3);
        let direct = db.create_room(None, false, ids[0], &ids[..2]).unwrap();
        assert!(matches!(
            db.add_participants(direct.id, ids[0], &[ids[2]]),
            Err(ChatError::InvalidMembership(_))
        ));
    }

    #[test]
    fn reuses_existing_direct_room_and_lists_co_participants() {
        let db = db();
        let ids = users(&db, 4);
        let direct = db.create_room(None, false, ids[0], &ids[..2]).unwrap();
        db.create_room(Some("team"), true, ids[2], &ids[..3]).unwrap();

        let (reused, created) = db.open_direct_room(ids[1], ids[0]).unwrap();
        assert!(!created);
        assert_eq!(reused.id, direct.id);

        // Sharing a group room does not count as having a direct room.
        let (fresh, created) = db.open_direct_room(ids[0], ids[2]).unwrap();
        assert!(created);
        assert!(!fresh.is_group);
        assert_eq!(db.participants_of(fresh.id).unwrap(), vec![ids[0], ids[2]]);

        assert!(matches!(
            db.open_direct_room(ids[0], ids[0]),
            Err(ChatError::InvalidMembership(_))
        ));
        assert!(matches!(
            db.open_direct_room(ids[0], 999),
            Err(ChatError::InvalidMembership(_))
        ));

        assert_eq!(db.co_participants(ids[0]).unwrap(), vec![ids[1], ids[2]]);
        assert!(db.co_participants(ids[3]).unwrap().is_empty());
    }

    #[test]
    fn concurrent_direct_requests_share_one_room() {
        let db = std::sync::Arc::new(db());
        let ids = users(&db, 2);
        let (a, b) = (ids[0], ids[1]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = std::sync::Arc::clone(&db);
                let (me, other) = if i % 2 == 0 { (a, b) } else { (b, a) };
                std::thread::spawn(move || db.open_direct_room(me, other).unwrap())
            })
            .collect();
        let results: Vec<(ChatRoom, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        assert!(results.iter().all(|(room, _)| room.id == results[0].0.id));
        assert_eq!(db.list_rooms_for(a).unwrap().len(), 1);
    }
}
