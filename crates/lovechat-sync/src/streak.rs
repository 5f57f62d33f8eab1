use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lovechat_types::events::StoreChange;
use lovechat_types::models::ChatMetadata;

use crate::error::ChatError;
use crate::store::DocumentStore;

/// Default interval between streak recomputations.
pub const DEFAULT_STREAK_TICK: Duration = Duration::from_secs(60);

/// Days since the first message, counting the first day as 1.
///
/// No first message means no streak, and a clock that reads earlier than the
/// stored timestamp yields 0 rather than a negative count.
pub fn compute_streak(first_message_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let Some(first) = first_message_at else {
        return 0;
    };
    if now < first {
        return 0;
    }
    // Non-negative here, so truncation is floor
    let elapsed_days = (now - first).num_days();
    u32::try_from(elapsed_days).map_or(u32::MAX, |days| days.saturating_add(1))
}

/// Anchor the streak on the first send. The store's create-if-absent
/// primitive decides the winner when both participants race; an existing
/// timestamp is never overwritten.
pub async fn ensure_first_message_timestamp<S: DocumentStore>(store: &S) -> Result<ChatMetadata, ChatError> {
    let current = store.metadata().await?;
    if current.first_message_at.is_some() {
        return Ok(current);
    }

    let persisted = store.create_metadata_if_absent().await?;
    if let Some(at) = persisted.first_message_at {
        info!("Love streak anchored at {}", at);
    }
    Ok(persisted)
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a live streak value: recomputed on every metadata change and on a
/// fixed tick so the count rolls over at day boundaries without any writes.
pub struct StreakTracker {
    rx: watch::Receiver<u32>,
    task: JoinHandle<()>,
}

impl StreakTracker {
    pub fn spawn<S: DocumentStore>(store: Arc<S>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        let (tx, rx) = watch::channel(0);
        let mut changes = store.changes();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    change = changes.recv() => match change {
                        Ok(StoreChange::MetadataChanged) | Err(RecvError::Lagged(_)) => {}
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }

                match store.metadata().await {
                    Ok(meta) => {
                        let streak = compute_streak(meta.first_message_at, clock.now());
                        tx.send_if_modified(|current| {
                            if *current == streak {
                                return false;
                            }
                            debug!("Love streak is now {}", streak);
                            *current = streak;
                            true
                        });
                    }
                    // Keep showing the last known value
                    Err(e) => warn!("Streak refresh failed: {}", e),
                }
            }
        });

        Self { rx, task }
    }

    pub fn current(&self) -> u32 {
        *self.rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u32> {
        self.rx.clone()
    }
}

impl Drop for StreakTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
