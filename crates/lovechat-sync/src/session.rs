use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::info;

use lovechat_types::events::Notice;
use lovechat_types::models::{Message, Participant};

use crate::capture::{AudioCapture, VoiceRecorder};
use crate::composer::Composer;
use crate::error::ChatError;
use crate::reactions::{ReactionEngine, ReactionMode};
use crate::store::DocumentStore;
use crate::streak::{Clock, DEFAULT_STREAK_TICK, StreakTracker};
use crate::synchronizer::{MessageSynchronizer, Subscription};
use crate::uploads::BlobUploader;

const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub participant: Participant,
    pub reaction_mode: ReactionMode,
    pub streak_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            participant: Participant::User1,
            reaction_mode: ReactionMode::default(),
            streak_tick: DEFAULT_STREAK_TICK,
        }
    }
}

/// One person's view of the chat: live messages, live streak, the composer
/// and reaction actions, and a feed of transient notices. Failures become
/// notices; nothing here panics or propagates into the render loop.
pub struct ChatSession<S, U, C> {
    participant: Participant,
    composer: Composer<S, U>,
    reactions: ReactionEngine<S>,
    recorder: VoiceRecorder<C>,
    messages: watch::Receiver<Vec<Message>>,
    subscription: Subscription,
    streak: StreakTracker,
    notices: broadcast::Sender<Notice>,
}

impl<S, U, C> ChatSession<S, U, C>
where
    S: DocumentStore,
    U: BlobUploader,
    C: AudioCapture,
{
    /// Must be called from inside a Tokio runtime.
    pub fn start(store: Arc<S>, uploader: Arc<U>, device: C, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (messages_tx, messages) = watch::channel(Vec::new());

        let error_notices = notices.clone();
        let subscription = MessageSynchronizer::new(store.clone()).subscribe(
            move |snapshot| {
                messages_tx.send_replace(snapshot);
            },
            move |err| {
                let _ = error_notices.send(err.notice());
            },
        );

        let streak = StreakTracker::spawn(store.clone(), clock, config.streak_tick);

        info!("Chat session started as {}", config.participant.display_name());
        Self {
            participant: config.participant,
            composer: Composer::new(store.clone(), uploader),
            reactions: ReactionEngine::new(store, config.reaction_mode),
            recorder: VoiceRecorder::new(device),
            messages,
            subscription,
            streak,
            notices,
        }
    }

    pub fn participant(&self) -> Participant {
        self.participant
    }

    /// The user switcher: who the next action is sent as.
    pub fn switch_participant(&mut self, participant: Participant) {
        if self.participant != participant {
            info!("Switched to {}", participant.display_name());
            self.participant = participant;
        }
    }

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn streak(&self) -> watch::Receiver<u32> {
        self.streak.watch()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub async fn send_text(&self, text: &str) -> Option<Message> {
        let sent = self.composer.send_text(self.participant, text).await;
        self.report(sent).flatten()
    }

    pub async fn send_file(&self, bytes: Bytes, content_type: &str) -> Option<Message> {
        let sent = self.composer.send_file(self.participant, bytes, content_type).await;
        self.report(sent)
    }

    pub async fn start_recording(&mut self) -> bool {
        let started = self.recorder.start().await;
        self.report(started).is_some()
    }

    /// Stop recording and send the clip, if there is one.
    pub async fn finish_recording(&mut self) -> Option<Message> {
        let clip = self.recorder.finish().await;
        let clip = self.report(clip).flatten()?;
        let sent = self.composer.send_voice(self.participant, clip).await;
        self.report(sent)
    }

    pub fn cancel_recording(&mut self) {
        self.recorder.cancel();
    }

    /// Toggle the current participant's `emoji` on a message. Reacting to a
    /// message that has since vanished does nothing and shows nothing.
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) {
        let toggled = self.reactions.toggle_reaction(message_id, emoji, self.participant).await;
        self.report(toggled);
    }

    /// Stop the live message query. The session's other actions still work.
    pub fn close(&self) {
        self.subscription.cancel();
    }

    fn report<T>(&self, result: Result<T, ChatError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let _ = self.notices.send(err.notice());
                None
            }
        }
    }
}
