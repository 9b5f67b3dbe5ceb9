use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT NOT NULL,
                is_online       INTEGER NOT NULL DEFAULT 0,
                last_seen       TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE chat_rooms (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT,
                is_group        INTEGER NOT NULL DEFAULT 0,
                is_pinned       INTEGER NOT NULL DEFAULT 0,
                created_by      INTEGER NOT NULL REFERENCES users(id),
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE chat_participants (
                chat_room_id    INTEGER NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id),
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (chat_room_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON chat_participants(user_id);

            -- AUTOINCREMENT: ids are the ordering key and must never be reused
            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_room_id    INTEGER NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
                sender_id       INTEGER NOT NULL REFERENCES users(id),
                ciphertext      BLOB NOT NULL,
                message_type    TEXT NOT NULL DEFAULT 'text',
                file_url        TEXT,
                file_name       TEXT,
                file_size       INTEGER,
                file_sha256     TEXT,
                reply_to_id     INTEGER REFERENCES messages(id) ON DELETE SET NULL,
                created_at      TEXT NOT NULL,
                edited_at       TEXT,
                expires_at      TEXT
            );

            CREATE INDEX idx_messages_room
                ON messages(chat_room_id, id);

            CREATE TABLE read_markers (
                user_id                 INTEGER NOT NULL REFERENCES users(id),
                chat_room_id            INTEGER NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
                last_read_message_id    INTEGER NOT NULL,
                last_read_at            TEXT NOT NULL,
                PRIMARY KEY (user_id, chat_room_id)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
