use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lovechat_types::events::StoreChange;
use lovechat_types::models::Message;

use crate::error::ChatError;
use crate::store::DocumentStore;

/// Republishes the full ordered message sequence whenever the store reports
/// a change. Callers never see deltas, only whole snapshots in the order the
/// store returned them.
pub struct MessageSynchronizer<S> {
    store: Arc<S>,
}

impl<S> Clone for MessageSynchronizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: DocumentStore> MessageSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Start a live query. `on_update` receives the current sequence right
    /// away and again after every batch of changes; `on_error` receives
    /// classified store failures. There is no automatic retry: after an
    /// error the subscription keeps waiting for the next change.
    ///
    /// Callbacks run on a runtime task and must not cancel their own
    /// subscription from inside the callback.
    pub fn subscribe<U, E>(&self, on_update: U, on_error: E) -> Subscription
    where
        U: Fn(Vec<Message>) + Send + 'static,
        E: Fn(ChatError) + Send + 'static,
    {
        // Subscribe before the first read so no change can slip between them
        let mut changes = self.store.changes();
        let store = self.store.clone();
        let gate = Arc::new(Gate::new());
        let task_gate = gate.clone();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = store.list_messages().await;
                let delivered = task_gate.run(|| match snapshot {
                    Ok(messages) => on_update(messages),
                    Err(e) => {
                        warn!("Message snapshot failed: {}", e);
                        on_error(e)
                    }
                });
                if !delivered {
                    break;
                }

                if !wait_for_message_change(&mut changes).await {
                    task_gate.run(|| on_error(ChatError::Unavailable("change feed closed".into())));
                    break;
                }
            }
        });

        Subscription { gate, task }
    }
}

/// Block until at least one message change arrives, then swallow whatever
/// else is already queued so a burst produces a single snapshot. Returns
/// false once the feed is closed.
async fn wait_for_message_change(changes: &mut broadcast::Receiver<StoreChange>) -> bool {
    loop {
        match changes.recv().await {
            Ok(change) if change.touches_messages() => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                // Missed notifications are harmless: the next read is a full snapshot
                debug!("Change feed lagged by {} notifications", n);
                break;
            }
            Err(RecvError::Closed) => return false,
        }
    }

    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}

/// Serializes callback delivery against cancellation: once `close` returns,
/// no callback is running and none will start.
struct Gate {
    active: Mutex<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            active: Mutex::new(true),
        }
    }

    fn run(&self, f: impl FnOnce()) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !*active {
            return false;
        }
        f();
        true
    }

    /// Returns true if this call did the closing.
    fn close(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *active, false)
    }

    fn is_open(&self) -> bool {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle for a live message query. Dropping it cancels.
pub struct Subscription {
    gate: Arc<Gate>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery. Safe to call any number of times.
    pub fn cancel(&self) {
        if self.gate.close() {
            debug!("Message subscription cancelled");
        }
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open() && !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
