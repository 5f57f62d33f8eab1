use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Change notifications published by the document store. They carry ids
/// only; subscribers re-read whatever state they render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreChange {
    MessageCreated { id: String },
    MessageUpdated { id: String },
    MetadataChanged,
}

impl StoreChange {
    /// True for changes that alter the ordered message sequence.
    pub fn touches_messages(&self) -> bool {
        matches!(self, Self::MessageCreated { .. } | Self::MessageUpdated { .. })
    }
}

/// A transient, dismissible notification for the person at the keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
}

/// Events pushed to browsers over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// The whole ordered message sequence, sent on connect and after every change
    Snapshot { messages: Vec<Message> },

    /// Current love streak in days
    Streak { days: u32 },

    /// Something went wrong; show it and move on
    Notice(Notice),
}
