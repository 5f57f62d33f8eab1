use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Emoji offered by the reaction picker.
pub const REACTION_PALETTE: [&str; 6] = ["❤️", "🥰", "😘", "✨", "💖", "😍"];

// -- Participants --

/// One of the two fixed people in the chat. Selection is local state,
/// there is no authentication behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participant {
    User1,
    User2,
}

impl Participant {
    pub fn id(self) -> &'static str {
        match self {
            Self::User1 => "user1",
            Self::User2 => "user2",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::User1 => "You",
            Self::User2 => "Partner",
        }
    }

}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error)]
#[error("unknown participant '{0}'")]
pub struct UnknownParticipant(pub String);

impl FromStr for Participant {
    type Err = UnknownParticipant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user1" => Ok(Self::User1),
            "user2" => Ok(Self::User2),
            other => Err(UnknownParticipant(other.to_string())),
        }
    }
}

// -- Message content --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
    Image,
    Video,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl FromStr for MessageKind {
    type Err = InvalidMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(InvalidMessage::UnknownKind(other.to_string())),
        }
    }
}

/// Blob categories accepted by the upload service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Audio,
    Image,
    Video,
}

impl MediaCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A message body. The media URL lives inside the variant, so a voice
/// message cannot carry an image URL and a text message carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Voice { url: String },
    Image { url: String },
    Video { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMessage {
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),
    #[error("{kind} message is missing its media url")]
    MissingUrl { kind: &'static str },
    #[error("{kind} message carries a foreign media url")]
    ForeignUrl { kind: &'static str },
}

impl MessageContent {
    /// Rebuild content from the flat document fields, enforcing that exactly
    /// the URL matching `kind` is present and non-empty.
    pub fn from_parts(
        kind: MessageKind,
        text: String,
        voice_url: Option<String>,
        image_url: Option<String>,
        video_url: Option<String>,
    ) -> Result<Self, InvalidMessage> {
        let present = |u: &Option<String>| u.as_deref().is_some_and(|s| !s.is_empty());
        let kind_name = kind.as_str();

        let (own, foreign) = match kind {
            MessageKind::Text => (None, present(&voice_url) || present(&image_url) || present(&video_url)),
            MessageKind::Voice => (Some(voice_url), present(&image_url) || present(&video_url)),
            MessageKind::Image => (Some(image_url), present(&voice_url) || present(&video_url)),
            MessageKind::Video => (Some(video_url), present(&voice_url) || present(&image_url)),
        };
        if foreign {
            return Err(InvalidMessage::ForeignUrl { kind: kind_name });
        }

        let url = match own {
            None => return Ok(Self::Text(text)),
            Some(Some(url)) if !url.is_empty() => url,
            Some(_) => return Err(InvalidMessage::MissingUrl { kind: kind_name }),
        };

        Ok(match kind {
            MessageKind::Voice => Self::Voice { url },
            MessageKind::Image => Self::Image { url },
            _ => Self::Video { url },
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Voice { .. } => MessageKind::Voice,
            Self::Image { .. } => MessageKind::Image,
            Self::Video { .. } => MessageKind::Video,
        }
    }

    /// Body text; empty for media messages.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text.as_str(),
            _ => "",
        }
    }

    pub fn voice_url(&self) -> Option<&str> {
        match self {
            Self::Voice { url } => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::Image { url } => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn video_url(&self) -> Option<&str> {
        match self {
            Self::Video { url } => Some(url.as_str()),
            _ => None,
        }
    }
}

// -- Reactions --

/// Outcome of a single toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionEdit {
    Added,
    Removed,
}

/// Emoji -> participants who applied it. An emoji key never maps to an
/// empty set: removal drops the key and deserializing discards empty sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReactionMap(BTreeMap<String, BTreeSet<Participant>>);

impl<'de> Deserialize<'de> for ReactionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = BTreeMap::<String, BTreeSet<Participant>>::deserialize(deserializer)?;
        map.retain(|_, set| !set.is_empty());
        Ok(Self(map))
    }
}

impl ReactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, emoji: &str, participant: Participant) -> bool {
        self.0.get(emoji).is_some_and(|set| set.contains(&participant))
    }

    /// Returns false if the participant had already reacted with this emoji.
    pub fn add(&mut self, emoji: &str, participant: Participant) -> bool {
        self.0.entry(emoji.to_string()).or_default().insert(participant)
    }

    /// Returns false if there was nothing to remove.
    pub fn remove(&mut self, emoji: &str, participant: Participant) -> bool {
        let Some(set) = self.0.get_mut(emoji) else {
            return false;
        };
        let removed = set.remove(&participant);
        if set.is_empty() {
            self.0.remove(emoji);
        }
        removed
    }

    pub fn toggle(&mut self, emoji: &str, participant: Participant) -> ReactionEdit {
        if self.remove(emoji, participant) {
            ReactionEdit::Removed
        } else {
            self.add(emoji, participant);
            ReactionEdit::Added
        }
    }

    pub fn participants(&self, emoji: &str) -> Option<&BTreeSet<Participant>> {
        self.0.get(emoji)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// -- Messages --

/// A stored chat message. Immutable apart from `reactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MessageDocument", try_from = "MessageDocument")]
pub struct Message {
    pub id: String,
    pub author: Participant,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionMap,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }
}

/// Flat document shape used on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDocument {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    voice_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_url: Option<String>,
    user_id: Participant,
    created_at: DateTime<Utc>,
    #[serde(default)]
    reactions: ReactionMap,
}

impl From<Message> for MessageDocument {
    fn from(msg: Message) -> Self {
        let kind = msg.content.kind();
        let text = msg.content.text().to_string();
        let (voice_url, image_url, video_url) = match msg.content {
            MessageContent::Text(_) => (None, None, None),
            MessageContent::Voice { url } => (Some(url), None, None),
            MessageContent::Image { url } => (None, Some(url), None),
            MessageContent::Video { url } => (None, None, Some(url)),
        };
        Self {
            id: msg.id,
            text,
            kind,
            voice_url,
            image_url,
            video_url,
            user_id: msg.author,
            created_at: msg.created_at,
            reactions: msg.reactions,
        }
    }
}

impl TryFrom<MessageDocument> for Message {
    type Error = InvalidMessage;

    fn try_from(doc: MessageDocument) -> Result<Self, Self::Error> {
        let content =
            MessageContent::from_parts(doc.kind, doc.text, doc.voice_url, doc.image_url, doc.video_url)?;
        Ok(Self {
            id: doc.id,
            author: doc.user_id,
            content,
            created_at: doc.created_at,
            reactions: doc.reactions,
        })
    }
}

/// A message before the store has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub author: Participant,
    pub content: MessageContent,
}

// -- Metadata --

/// Singleton record anchoring the streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    #[serde(rename = "firstMessageTimestamp")]
    pub first_message_at: Option<DateTime<Utc>>,
}
