use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

use lovechat_db::Database;
use lovechat_db::models::{MessageRow, NewMessageRow};
use lovechat_types::events::StoreChange;
use lovechat_types::models::{
    ChatMetadata, Message, MessageContent, NewMessage, Participant, ReactionEdit, ReactionMap,
};

use crate::error::ChatError;

/// Capacity of the change-notification channel. Lagging subscribers only
/// lose notifications, never state: they re-read a full snapshot.
const CHANGE_FEED_CAPACITY: usize = 256;

/// The document store the chat core talks to.
///
/// Writes are single-document and last-writer-wins; there are no
/// cross-document transactions. Every successful write publishes a
/// [`StoreChange`] to receivers obtained from [`DocumentStore::changes`].
pub trait DocumentStore: Send + Sync + 'static {
    /// All messages ordered by server-assigned creation time, oldest first.
    fn list_messages(&self) -> impl Future<Output = Result<Vec<Message>, ChatError>> + Send;

    fn get_message(&self, id: &str) -> impl Future<Output = Result<Option<Message>, ChatError>> + Send;

    /// Persist a new message; the store assigns the id and timestamp.
    fn create_message(&self, msg: NewMessage) -> impl Future<Output = Result<Message, ChatError>> + Send;

    /// Replace a message's whole reaction map. `Ok(false)` if the message is gone.
    fn write_reactions(
        &self,
        id: &str,
        reactions: &ReactionMap,
    ) -> impl Future<Output = Result<bool, ChatError>> + Send;

    /// Toggle one participant under one emoji as a single atomic document
    /// update. `Ok(None)` if the message is gone.
    fn merge_reaction(
        &self,
        id: &str,
        emoji: &str,
        participant: Participant,
    ) -> impl Future<Output = Result<Option<ReactionEdit>, ChatError>> + Send;

    fn metadata(&self) -> impl Future<Output = Result<ChatMetadata, ChatError>> + Send;

    /// Set the first-message timestamp to server "now" unless already set,
    /// returning whatever value is persisted afterwards.
    fn create_metadata_if_absent(&self) -> impl Future<Output = Result<ChatMetadata, ChatError>> + Send;

    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// [`DocumentStore`] over the SQLite database. Clones share the database
/// and the change feed, so every clone sees every other clone's writes.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db: Arc::new(db),
            changes,
        }
    }

    /// Live change-feed receivers: one per open subscription or tracker.
    pub fn listeners(&self) -> usize {
        self.changes.receiver_count()
    }

    fn publish(&self, change: StoreChange) {
        debug!("Store change: {:?}", change);
        // No receivers is fine
        let _ = self.changes.send(change);
    }
}

/// Run blocking DB work off the async runtime.
async fn blocking<F, T>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::from(e)
        })?
        .map_err(ChatError::from_store)
}

impl DocumentStore for SqliteStore {
    async fn list_messages(&self) -> Result<Vec<Message>, ChatError> {
        let db = self.db.clone();
        let rows = blocking(move || db.list_messages()).await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, ChatError> {
        let db = self.db.clone();
        let id = id.to_string();
        let row = blocking(move || db.get_message(&id)).await?;
        row.map(message_from_row).transpose()
    }

    async fn create_message(&self, msg: NewMessage) -> Result<Message, ChatError> {
        let db = self.db.clone();
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();

        let row = blocking(move || {
            let content = &msg.content;
            db.insert_message(&NewMessageRow {
                id: &row_id,
                author: msg.author.id(),
                kind: content.kind().as_str(),
                text: content.text(),
                voice_url: content.voice_url(),
                image_url: content.image_url(),
                video_url: content.video_url(),
            })
        })
        .await?;

        let message = message_from_row(row)?;
        self.publish(StoreChange::MessageCreated { id });
        Ok(message)
    }

    async fn write_reactions(&self, id: &str, reactions: &ReactionMap) -> Result<bool, ChatError> {
        let json = serde_json::to_string(reactions).map_err(|e| ChatError::Corrupt(e.to_string()))?;
        let db = self.db.clone();
        let row_id = id.to_string();

        let written = blocking(move || db.write_reactions(&row_id, &json)).await?;
        if written {
            self.publish(StoreChange::MessageUpdated { id: id.to_string() });
        }
        Ok(written)
    }

    async fn merge_reaction(
        &self,
        id: &str,
        emoji: &str,
        participant: Participant,
    ) -> Result<Option<ReactionEdit>, ChatError> {
        let db = self.db.clone();
        let row_id = id.to_string();
        let emoji = emoji.to_string();

        let edit = blocking(move || db.merge_reaction(&row_id, &emoji, participant)).await?;
        if edit.is_some() {
            self.publish(StoreChange::MessageUpdated { id: id.to_string() });
        }
        Ok(edit)
    }

    async fn metadata(&self) -> Result<ChatMetadata, ChatError> {
        let db = self.db.clone();
        let row = blocking(move || db.get_metadata()).await?;
        let first_message_at = row.map(|r| timestamp_from_micros(r.first_message_at)).transpose()?;
        Ok(ChatMetadata { first_message_at })
    }

    async fn create_metadata_if_absent(&self) -> Result<ChatMetadata, ChatError> {
        let db = self.db.clone();
        let (row, created) = blocking(move || db.insert_metadata_if_absent()).await?;
        if created {
            self.publish(StoreChange::MetadataChanged);
        }
        Ok(ChatMetadata {
            first_message_at: Some(timestamp_from_micros(row.first_message_at)?),
        })
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, ChatError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ChatError::Corrupt(format!("timestamp out of range: {micros}")))
}

fn message_from_row(row: MessageRow) -> Result<Message, ChatError> {
    let corrupt = |what: String| ChatError::Corrupt(format!("message {}: {}", row.id, what));

    let author: Participant = row.author.parse().map_err(|e| corrupt(format!("{e}")))?;
    let kind = row.kind.parse().map_err(|e| corrupt(format!("{e}")))?;
    let content = MessageContent::from_parts(
        kind,
        row.text.clone(),
        row.voice_url.clone(),
        row.image_url.clone(),
        row.video_url.clone(),
    )
    .map_err(|e| corrupt(e.to_string()))?;
    let reactions: ReactionMap =
        serde_json::from_str(&row.reactions).map_err(|e| corrupt(format!("reactions: {e}")))?;
    let created_at = timestamp_from_micros(row.created_at)?;

    Ok(Message {
        id: row.id,
        author,
        content,
        created_at,
        reactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovechat_types::models::MessageKind;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn created_messages_satisfy_the_url_invariant() {
        let store = store();
        let contents = [
            MessageContent::Text("hello".into()),
            MessageContent::Voice { url: "https://m/v.webm".into() },
            MessageContent::Image { url: "https://m/i.png".into() },
            MessageContent::Video { url: "https://m/v.mp4".into() },
        ];
        for content in contents {
            store
                .create_message(NewMessage { author: Participant::User1, content })
                .await
                .unwrap();
        }

        for msg in store.list_messages().await.unwrap() {
            let urls = [msg.content.voice_url(), msg.content.image_url(), msg.content.video_url()];
            let set = urls.iter().filter(|u| u.is_some()).count();
            match msg.kind() {
                MessageKind::Text => assert_eq!(set, 0),
                MessageKind::Voice => assert!(msg.content.voice_url().is_some() && set == 1),
                MessageKind::Image => assert!(msg.content.image_url().is_some() && set == 1),
                MessageKind::Video => assert!(msg.content.video_url().is_some() && set == 1),
            }
        }
    }

    #[tokio::test]
    async fn writes_publish_changes() {
        let store = store();
        let mut changes = store.changes();

        let msg = store
            .create_message(NewMessage {
                author: Participant::User2,
                content: MessageContent::Text("hi".into()),
            })
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap(), StoreChange::MessageCreated { id: msg.id.clone() });

        let mut reactions = ReactionMap::new();
        reactions.add("💖", Participant::User1);
        assert!(store.write_reactions(&msg.id, &reactions).await.unwrap());
        assert_eq!(changes.recv().await.unwrap(), StoreChange::MessageUpdated { id: msg.id.clone() });

        // Writing to a missing message publishes nothing
        assert!(!store.write_reactions("missing", &reactions).await.unwrap());

        store.create_metadata_if_absent().await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), StoreChange::MetadataChanged);
        store.create_metadata_if_absent().await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        let row = MessageRow {
            id: "m1".into(),
            author: "user1".into(),
            kind: "voice".into(),
            text: String::new(),
            voice_url: None,
            image_url: None,
            video_url: None,
            reactions: "{}".into(),
            created_at: 0,
        };
        assert!(matches!(message_from_row(row), Err(ChatError::Corrupt(_))));
    }
}
