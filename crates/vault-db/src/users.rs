use rusqlite::{Connection, ErrorCode, OptionalExtension};
use vault_types::{User, UserId};

use crate::models::{USER_COLUMNS, UserRow};
use crate::time::{now, to_sql};
use crate::{ChatError, Database, Result, placeholders};

impl Database {
    /// Account setup lives outside the core; this is the minimal insert that
    /// setup tooling and tests need.
    pub fn create_user(&self, username: &str, display_name: &str) -> Result<User> {
        let username = username.trim();
        let display_name = display_name.trim();
        if username.len() < 3 || username.len() > 32 {
            return Err(ChatError::Validation("username must be 3-32 characters".into()));
        }
        if display_name.is_empty() {
            return Err(ChatError::Validation("display name must not be empty".into()));
        }

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, display_name, created_at) VALUES (?1, ?2, ?3)",
                (username, display_name, to_sql(&now())),
            );
            match inserted {
                Ok(_) => query_user(conn, conn.last_insert_rowid())?.ok_or(ChatError::NotFound("user")),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(ChatError::Validation(format!("username '{}' is taken", username)))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user(&self, user_id: UserId) -> Result<User> {
        self.with_conn(|conn| query_user(conn, user_id)?.ok_or(ChatError::NotFound("user")))
    }

    pub fn user_exists(&self, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Marks a user online or offline and stamps `last_seen`.
    pub fn set_presence(&self, user_id: UserId, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3",
                (online, to_sql(&now()), user_id),
            )?;
            if changed == 0 {
                return Err(ChatError::NotFound("user"));
            }
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, user_id: UserId) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [user_id], |row| UserRow::from_row_at(row, 0))
        .optional()?;
    Ok(row.map(UserRow::into_user))
}

/// Ids from `user_ids` that have no user row.
pub(crate) fn missing_users(conn: &Connection, user_ids: &[UserId]) -> Result<Vec<UserId>> {
    if user_ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!("SELECT id FROM users WHERE id IN ({})", placeholders(user_ids.len()));
    let mut stmt = conn.prepare(&sql)?;
    let found = stmt
        .query_map(rusqlite::params_from_iter(user_ids), |row| row.get::<_, UserId>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(user_ids.iter().copied().filter(|id| !found.contains(id)).collect())
}

#[cfg(test)]
mod tests {
    use crate::ChatError;
    use crate::testing::db;

    #[test]
    fn create_and_fetch_user() {
        let db = db();
        let user = db.create_user("alice", "Alice").unwrap();
        assert!(!user.is_online);
        assert_eq!(db.get_user(user.id).unwrap(), user);
    }

    #[test]
    fn duplicate_username_is_validation_error() {
        let db = db();
        db.create_user("alice", "Alice").unwrap();
        let err = db.create_user("alice", "Other Alice").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn presence_toggles_and_stamps_last_seen() {
        let db = db();
        let user = db.create_user("bob", "Bob").unwrap();

        db.set_presence(user.id, true).unwrap();
        let online = db.get_user(user.id).unwrap();
        assert!(online.is_online);
        assert!(online.last_seen.is_some());

        db.set_presence(user.id, false).unwrap();
        assert!(!db.get_user(user.id).unwrap().is_online);

        assert!(matches!(db.set_presence(999, true), Err(ChatError::NotFound("user"))));
    }
}
