pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reads;
pub mod rooms;
pub mod users;

mod time;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use vault_crypto::Codec;

pub use error::{ChatError, Result};
pub use messages::NewMessage;

/// The persistent store: rooms, memberships, messages and read markers.
///
/// Writes go through a single connection, so every multi-statement operation
/// (room creation, read-marker upsert) is serialized and runs in its own
/// transaction. Message bodies are sealed with `codec` before they are written
/// and opened after the lock is released.
pub struct Database {
    conn: Mutex<Connection>,
    codec: Codec,
}

impl Database {
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, codec)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// A private in-memory database. Used by tests and tooling.
    pub fn open_in_memory(codec: Codec) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, codec)
    }

    fn from_connection(conn: Connection, codec: Codec) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            codec,
        })
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| ChatError::LockPoisoned)?;
        f(&conn)
    }

    /// Like [`Database::with_conn`] but hands out `&mut` so the closure can
    /// open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| ChatError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// `?, ?, ?` for an `IN (...)` clause of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
