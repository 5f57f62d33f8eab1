//! Database row types, mapped straight from SQLite. Conversion into the
//! validated `lovechat_types` models happens at the store boundary.

pub struct MessageRow {
    pub id: String,
    pub author: String,
    pub kind: String,
    pub text: String,
    pub voice_url: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    /// JSON object of emoji -> participant ids
    pub reactions: String,
    /// Microseconds since the Unix epoch
    pub created_at: i64,
}

/// Columns for a message about to be inserted.
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub author: &'a str,
    pub kind: &'a str,
    pub text: &'a str,
    pub voice_url: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub video_url: Option<&'a str>,
}

pub struct MetadataRow {
    pub first_message_at: i64,
}
