use crate::Database;
use crate::models::{MessageRow, MetadataRow, NewMessageRow};
use anyhow::Result;
use lovechat_types::models::{Participant, ReactionEdit, ReactionMap};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::debug;

/// Key of the singleton metadata record.
const CHAT_INFO_ID: &str = "chatInfo";

const MESSAGE_COLUMNS: &str =
    "id, author, kind, text, voice_url, image_url, video_url, reactions, created_at";

impl Database {
    // -- Messages --

    /// Insert a message and assign its creation timestamp. Timestamps are
    /// strictly increasing per database even when the wall clock repeats or
    /// steps backwards.
    pub fn insert_message(&self, msg: &NewMessageRow<'_>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let last: Option<i64> =
                tx.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
            let created_at = server_now_micros(last);

            tx.execute(
                "INSERT INTO messages (id, author, kind, text, voice_url, image_url, video_url, reactions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{}', ?8)",
                rusqlite::params![
                    msg.id,
                    msg.author,
                    msg.kind,
                    msg.text,
                    msg.voice_url,
                    msg.image_url,
                    msg.video_url,
                    created_at
                ],
            )?;
            tx.commit()?;

            debug!("Inserted {} message {} at {}", msg.kind, msg.id, created_at);
            Ok(MessageRow {
                id: msg.id.to_string(),
                author: msg.author.to_string(),
                kind: msg.kind.to_string(),
                text: msg.text.to_string(),
                voice_url: msg.voice_url.map(str::to_string),
                image_url: msg.image_url.map(str::to_string),
                video_url: msg.video_url.map(str::to_string),
                reactions: "{}".to_string(),
                created_at,
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// All messages, oldest first.
    pub fn list_messages(&self) -> Result<Vec<MessageRow>> {
        self.with_conn(query_messages)
    }

    // -- Reactions --

    /// Overwrite a message's whole reaction map. Returns false if the message
    /// does not exist.
    pub fn write_reactions(&self, message_id: &str, reactions_json: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                (reactions_json, message_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Toggle one participant under one emoji inside a single transaction, so
    /// concurrent toggles on the same message never overwrite each other.
    /// Returns `None` if the message does not exist.
    pub fn merge_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        participant: Participant,
    ) -> Result<Option<ReactionEdit>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row("SELECT reactions FROM messages WHERE id = ?1", [message_id], |row| {
                    row.get(0)
                })
                .optional()?;

            let Some(current) = current else {
                return Ok(None);
            };

            let mut reactions: ReactionMap = serde_json::from_str(&current)?;
            let edit = reactions.toggle(emoji, participant);

            tx.execute(
                "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                (serde_json::to_string(&reactions)?, message_id),
            )?;
            tx.commit()?;

            Ok(Some(edit))
        })
    }

    // -- Metadata --

    pub fn get_metadata(&self) -> Result<Option<MetadataRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT first_message_at FROM metadata WHERE id = ?1",
                    [CHAT_INFO_ID],
                    |row| {
                        Ok(MetadataRow {
                            first_message_at: row.get(0)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Create the metadata record with the current server time unless it
    /// already exists. Returns the persisted row and whether this call
    /// created it. An existing timestamp is never touched.
    pub fn insert_metadata_if_absent(&self) -> Result<(MetadataRow, bool)> {
        self.with_conn(|conn| {
            let created = conn.execute(
                "INSERT OR IGNORE INTO metadata (id, first_message_at) VALUES (?1, ?2)",
                (CHAT_INFO_ID, server_now_micros(None)),
            )? > 0;

            let first_message_at: i64 = conn.query_row(
                "SELECT first_message_at FROM metadata WHERE id = ?1",
                [CHAT_INFO_ID],
                |row| row.get(0),
            )?;

            Ok((MetadataRow { first_message_at }, created))
        })
    }
}

fn server_now_micros(last: Option<i64>) -> i64 {
    let now = chrono::Utc::now().timestamp_micros();
    match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        author: row.get(1)?,
        kind: row.get(2)?,
        text: row.get(3)?,
        voice_url: row.get(4)?,
        image_url: row.get(5)?,
        video_url: row.get(6)?,
        reactions: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = conn.query_row(&sql, [id], map_message).optional()?;
    Ok(row)
}

fn query_messages(conn: &Connection) -> Result<Vec<MessageRow>> {
    // rowid breaks ties for rows written before timestamps were monotonic
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY created_at ASC, rowid ASC");
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row<'a>(id: &'a str, text: &'a str) -> NewMessageRow<'a> {
        NewMessageRow {
            id,
            author: "user1",
            kind: "text",
            text,
            voice_url: None,
            image_url: None,
            video_url: None,
        }
    }

    #[test]
    fn messages_come_back_in_insert_order() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..20 {
            let id = format!("m{i}");
            db.insert_message(&text_row(&id, "hi")).unwrap();
        }

        let rows = db.list_messages().unwrap();
        assert_eq!(rows.len(), 20);
        for pair in rows.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
        }
        assert_eq!(rows[0].id, "m0");
        assert_eq!(rows[19].id, "m19");
    }

    #[test]
    fn write_reactions_reports_missing_message() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&text_row("m1", "hi")).unwrap();

        assert!(db.write_reactions("m1", r#"{"❤️":["user1"]}"#).unwrap());
        assert!(!db.write_reactions("gone", "{}").unwrap());
        assert_eq!(db.get_message("m1").unwrap().unwrap().reactions, r#"{"❤️":["user1"]}"#);
    }

    #[test]
    fn merge_reaction_toggles_in_place() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&text_row("m1", "hi")).unwrap();

        assert_eq!(db.merge_reaction("m1", "❤️", Participant::User1).unwrap(), Some(ReactionEdit::Added));
        assert_eq!(db.merge_reaction("m1", "😘", Participant::User2).unwrap(), Some(ReactionEdit::Added));
        assert_eq!(db.merge_reaction("m1", "❤️", Participant::User1).unwrap(), Some(ReactionEdit::Removed));
        assert_eq!(db.merge_reaction("gone", "❤️", Participant::User1).unwrap(), None);

        let stored: ReactionMap =
            serde_json::from_str(&db.get_message("m1").unwrap().unwrap().reactions).unwrap();
        assert!(stored.participants("❤️").is_none());
        assert!(stored.contains("😘", Participant::User2));
    }

    #[test]
    fn metadata_is_written_once() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_metadata().unwrap().is_none());

        let (first, created) = db.insert_metadata_if_absent().unwrap();
        assert!(created);

        std::thread::sleep(std::time::Duration::from_millis(2));
        let (second, created_again) = db.insert_metadata_if_absent().unwrap();
        assert!(!created_again);
        assert_eq!(second.first_message_at, first.first_message_at);
        assert_eq!(db.get_metadata().unwrap().unwrap().first_message_at, first.first_message_at);
    }
}
