use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'member',
            created_at  TEXT NOT NULL
        );

        -- thread_root_id is NULL for roots and names the root for every
        -- reply at any depth, so a whole conversation loads in one query.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            body            TEXT NOT NULL,
            sent_at         TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0,
            edited          INTEGER NOT NULL DEFAULT 0,
            edited_at       TEXT,
            parent_id       TEXT REFERENCES messages(id) ON DELETE CASCADE,
            thread_root_id  TEXT REFERENCES messages(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_root_id, sent_at);

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, parent_id);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, read);

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            read        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS message_history (
            id             TEXT PRIMARY KEY,
            message_id     TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            previous_body  TEXT NOT NULL,
            replaced_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_message
            ON message_history(message_id, replaced_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
