use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Participant;

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub author: Participant,
    pub text: String,
}

/// Query string for raw-body media uploads (`?author=user1`).
#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub author: Participant,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub author: Participant,
    pub emoji: String,
}

// -- Streak --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResponse {
    pub streak: u32,
    pub first_message_timestamp: Option<DateTime<Utc>>,
}
