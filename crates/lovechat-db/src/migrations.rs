use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (messages + metadata)");
        conn.execute_batch(
            "
            -- created_at is microseconds since the Unix epoch, assigned at insert
            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                author      TEXT NOT NULL CHECK (author IN ('user1', 'user2')),
                kind        TEXT NOT NULL CHECK (kind IN ('text', 'voice', 'image', 'video')),
                text        TEXT NOT NULL DEFAULT '',
                voice_url   TEXT,
                image_url   TEXT,
                video_url   TEXT,
                reactions   TEXT NOT NULL DEFAULT '{}',
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_created ON messages(created_at);

            CREATE TABLE metadata (
                id                TEXT PRIMARY KEY,
                first_message_at  INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
