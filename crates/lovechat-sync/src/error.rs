use lovechat_types::events::Notice;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Every failure the chat core reports. None of them are fatal: the person
/// retries by repeating the action, or the failure is ignored outright.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("microphone access denied: {0}")]
    DeviceDenied(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// A stored record broke the message invariants
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl ChatError {
    /// Classify an error coming out of the SQLite layer.
    pub fn from_store(err: anyhow::Error) -> Self {
        if let Some(sql) = err.downcast_ref::<rusqlite::Error>() {
            return match sql.sqlite_error_code() {
                Some(
                    ErrorCode::ReadOnly
                    | ErrorCode::PermissionDenied
                    | ErrorCode::AuthorizationForStatementDenied,
                ) => Self::PermissionDenied(sql.to_string()),
                _ => Self::Unavailable(sql.to_string()),
            };
        }
        if err.downcast_ref::<serde_json::Error>().is_some() {
            return Self::Corrupt(err.to_string());
        }
        Self::Unavailable(err.to_string())
    }

    /// The transient notification shown for this failure.
    pub fn notice(&self) -> Notice {
        let (title, description) = match self {
            Self::PermissionDenied(_) => (
                "Permission Denied",
                "The chat store refused this request.",
            ),
            Self::Unavailable(_) => (
                "Connection Problem",
                "Could not reach the chat store. Please try again.",
            ),
            Self::NotFound(_) => ("Not Found", "That message no longer exists."),
            Self::ValidationFailed(_) => (
                "Unsupported File",
                "Only images and videos can be sent.",
            ),
            Self::DeviceDenied(_) => (
                "Microphone Access Denied",
                "Please allow microphone access in your browser settings to send voice notes.",
            ),
            Self::UploadFailed(_) => ("Upload Failed", "Could not send your file. Please try again."),
            Self::Corrupt(_) => ("Unreadable Message", "A message could not be displayed."),
        };
        Notice {
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unavailable(format!("store task failed: {err}"))
    }
}
