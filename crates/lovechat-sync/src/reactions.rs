use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use lovechat_types::models::{Participant, ReactionEdit, ReactionMap};

use crate::error::ChatError;
use crate::store::DocumentStore;

/// How a toggle reaches the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReactionMode {
    /// Read the map, edit it locally, write the whole map back. Two people
    /// toggling on the same message within one round trip can lose one edit.
    #[default]
    ReadModifyWrite,
    /// Let the store apply the toggle as one atomic document update.
    Atomic,
}

impl FromStr for ReactionMode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rmw" | "read-modify-write" => Ok(Self::ReadModifyWrite),
            "atomic" => Ok(Self::Atomic),
            other => Err(ChatError::ValidationFailed(format!("unknown reaction mode '{other}'"))),
        }
    }
}

pub struct ReactionEngine<S> {
    store: Arc<S>,
    mode: ReactionMode,
}

impl<S> Clone for ReactionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            mode: self.mode,
        }
    }
}

impl<S: DocumentStore> ReactionEngine<S> {
    pub fn new(store: Arc<S>, mode: ReactionMode) -> Self {
        Self { store, mode }
    }

    /// Add `participant` under `emoji`, or remove them if already there.
    /// A message that no longer exists makes this a silent no-op: `Ok(None)`.
    pub async fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        participant: Participant,
    ) -> Result<Option<ReactionEdit>, ChatError> {
        let outcome = match self.mode {
            ReactionMode::Atomic => self.store.merge_reaction(message_id, emoji, participant).await,
            ReactionMode::ReadModifyWrite => match self.prepare_toggle(message_id, emoji, participant).await {
                Ok(Some(pending)) => pending.commit().await,
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(None) | Err(ChatError::NotFound(_)) => {
                debug!("Reaction {} on vanished message {} ignored", emoji, message_id);
                Ok(None)
            }
            other => other,
        }
    }

    /// The read half of a read-modify-write toggle: fetch the current map and
    /// compute the edited one. Nothing is written until
    /// [`PendingToggle::commit`].
    pub async fn prepare_toggle(
        &self,
        message_id: &str,
        emoji: &str,
        participant: Participant,
    ) -> Result<Option<PendingToggle<'_, S>>, ChatError> {
        let Some(message) = self.store.get_message(message_id).await? else {
            return Ok(None);
        };

        let mut reactions = message.reactions;
        let edit = reactions.toggle(emoji, participant);

        Ok(Some(PendingToggle {
            store: &self.store,
            message_id: message.id,
            reactions,
            edit,
        }))
    }
}

/// A computed toggle waiting to be written. Committing overwrites whatever
/// map the message holds at that moment.
pub struct PendingToggle<'a, S> {
    store: &'a S,
    message_id: String,
    reactions: ReactionMap,
    edit: ReactionEdit,
}

impl<S: DocumentStore> PendingToggle<'_, S> {
    pub fn edit(&self) -> ReactionEdit {
        self.edit
    }

    pub fn reactions(&self) -> &ReactionMap {
        &self.reactions
    }

    /// Write the whole map back. `Ok(None)` if the message vanished since
    /// the read.
    pub async fn commit(self) -> Result<Option<ReactionEdit>, ChatError> {
        let written = self.store.write_reactions(&self.message_id, &self.reactions).await?;
        Ok(written.then_some(self.edit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovechat_db::Database;
    use lovechat_types::models::{Message, MessageContent, NewMessage};

    use crate::store::SqliteStore;

    async fn setup(mode: ReactionMode) -> (Arc<SqliteStore>, ReactionEngine<SqliteStore>, Message) {
        let store = Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()));
        let msg = store
            .create_message(NewMessage {
                author: Participant::User1,
                content: MessageContent::Text("good morning".into()),
            })
            .await
            .unwrap();
        let engine = ReactionEngine::new(store.clone(), mode);
        (store, engine, msg)
    }

    async fn reactions_of(store: &SqliteStore, id: &str) -> ReactionMap {
        store.get_message(id).await.unwrap().unwrap().reactions
    }

    #[tokio::test]
    async fn toggling_twice_restores_the_map() {
        for mode in [ReactionMode::ReadModifyWrite, ReactionMode::Atomic] {
            let (store, engine, msg) = setup(mode).await;
            engine.toggle_reaction(&msg.id, "✨", Participant::User2).await.unwrap();
            let before = reactions_of(&store, &msg.id).await;

            let first = engine.toggle_reaction(&msg.id, "❤️", Participant::User1).await.unwrap();
            assert_eq!(first, Some(ReactionEdit::Added));
            let second = engine.toggle_reaction(&msg.id, "❤️", Participant::User1).await.unwrap();
            assert_eq!(second, Some(ReactionEdit::Removed));

            let after = reactions_of(&store, &msg.id).await;
            assert_eq!(after, before);
            assert!(after.participants("❤️").is_none());
        }
    }

    #[tokio::test]
    async fn missing_message_is_a_noop() {
        for mode in [ReactionMode::ReadModifyWrite, ReactionMode::Atomic] {
            let (store, engine, msg) = setup(mode).await;
            let outcome = engine.toggle_reaction("no-such-id", "❤️", Participant::User1).await;
            assert_eq!(outcome, Ok(None));
            assert!(reactions_of(&store, &msg.id).await.is_empty());
        }
    }

    #[tokio::test]
    async fn pending_toggle_on_vanished_message_commits_nothing() {
        let (_store, engine, msg) = setup(ReactionMode::ReadModifyWrite).await;
        let pending = engine.prepare_toggle(&msg.id, "😍", Participant::User1).await.unwrap().unwrap();
        assert_eq!(pending.edit(), ReactionEdit::Added);
        assert!(pending.reactions().contains("😍", Participant::User1));

        let stray = PendingToggle {
            store: pending.store,
            message_id: "deleted-elsewhere".into(),
            reactions: pending.reactions.clone(),
            edit: pending.edit,
        };
        assert_eq!(stray.commit().await, Ok(None));
    }

    #[test]
    fn modes_parse() {
        assert_eq!("atomic".parse::<ReactionMode>().unwrap(), ReactionMode::Atomic);
        assert_eq!("rmw".parse::<ReactionMode>().unwrap(), ReactionMode::ReadModifyWrite);
        assert!("crdt".parse::<ReactionMode>().is_err());
    }
}
