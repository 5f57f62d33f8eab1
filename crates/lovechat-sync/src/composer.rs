use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use lovechat_types::models::{MediaCategory, Message, MessageContent, NewMessage, Participant};

use crate::error::ChatError;
use crate::store::DocumentStore;
use crate::streak::ensure_first_message_timestamp;
use crate::uploads::BlobUploader;

/// Content type recorded for voice notes when the device does not say.
pub const VOICE_CONTENT_TYPE: &str = "audio/webm";

/// Turns composer actions into message documents.
pub struct Composer<S, U> {
    store: Arc<S>,
    uploader: Arc<U>,
}

impl<S, U> Clone for Composer<S, U> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            uploader: self.uploader.clone(),
        }
    }
}

impl<S: DocumentStore, U: BlobUploader> Composer<S, U> {
    pub fn new(store: Arc<S>, uploader: Arc<U>) -> Self {
        Self { store, uploader }
    }

    /// Send a text message. Blank input sends nothing and returns `Ok(None)`.
    pub async fn send_text(&self, author: Participant, text: &str) -> Result<Option<Message>, ChatError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let message = self
            .publish(NewMessage {
                author,
                content: MessageContent::Text(text.to_string()),
            })
            .await?;
        Ok(Some(message))
    }

    pub async fn send_voice(&self, author: Participant, audio: Bytes) -> Result<Message, ChatError> {
        let url = self
            .uploader
            .upload(audio, MediaCategory::Audio, VOICE_CONTENT_TYPE)
            .await
            .inspect_err(|e| warn!("Voice note upload failed: {}", e))?;

        self.publish(NewMessage {
            author,
            content: MessageContent::Voice { url },
        })
        .await
    }

    /// Send a picked image or video. Anything else is rejected before upload.
    pub async fn send_file(&self, author: Participant, bytes: Bytes, content_type: &str) -> Result<Message, ChatError> {
        let category = attachment_category(content_type)?;
        let url = self
            .uploader
            .upload(bytes, category, content_type)
            .await
            .inspect_err(|e| warn!("{} upload failed: {}", category.as_str(), e))?;

        let content = match category {
            MediaCategory::Video => MessageContent::Video { url },
            _ => MessageContent::Image { url },
        };
        self.publish(NewMessage { author, content }).await
    }

    async fn publish(&self, msg: NewMessage) -> Result<Message, ChatError> {
        let message = self.store.create_message(msg).await?;
        info!("{} sent {} message {}", message.author, message.kind().as_str(), message.id);

        // The message is already out; a failed anchor is retried by the next send
        if let Err(e) = ensure_first_message_timestamp(&*self.store).await {
            warn!("Could not record first message timestamp: {}", e);
        }
        Ok(message)
    }
}

/// Which media category a picked file belongs to.
pub fn attachment_category(content_type: &str) -> Result<MediaCategory, ChatError> {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.starts_with("image/") {
        Ok(MediaCategory::Image)
    } else if essence.starts_with("video/") {
        Ok(MediaCategory::Video)
    } else {
        Err(ChatError::ValidationFailed(format!("unsupported file type '{content_type}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use lovechat_db::Database;
    use lovechat_types::models::MessageKind;

    use crate::store::SqliteStore;

    /// Records uploads in memory; optionally fails them.
    #[derive(Default)]
    struct RecordingUploader {
        fail: bool,
        uploads: Mutex<Vec<(MediaCategory, String, usize)>>,
    }

    impl BlobUploader for RecordingUploader {
        async fn upload(&self, bytes: Bytes, category: MediaCategory, content_type: &str) -> Result<String, ChatError> {
            if self.fail {
                return Err(ChatError::UploadFailed("bucket unreachable".into()));
            }
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((category, content_type.to_string(), bytes.len()));
            Ok(format!("https://blobs.example/{}/{}", category.as_str(), uploads.len()))
        }
    }

    fn composer(uploader: RecordingUploader) -> (Arc<SqliteStore>, Arc<RecordingUploader>, Composer<SqliteStore, RecordingUploader>) {
        let store = Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()));
        let uploader = Arc::new(uploader);
        let composer = Composer::new(store.clone(), uploader.clone());
        (store, uploader, composer)
    }

    #[tokio::test]
    async fn blank_text_sends_nothing() {
        let (store, _, composer) = composer(RecordingUploader::default());
        assert_eq!(composer.send_text(Participant::User1, "  \n\t").await.unwrap(), None);
        assert!(store.list_messages().await.unwrap().is_empty());
        assert_eq!(store.metadata().await.unwrap().first_message_at, None);
    }

    #[tokio::test]
    async fn first_send_anchors_the_streak() {
        let (store, _, composer) = composer(RecordingUploader::default());
        let msg = composer.send_text(Participant::User1, "hey you").await.unwrap().unwrap();
        assert_eq!(msg.content.text(), "hey you");
        assert!(msg.reactions.is_empty());

        let anchor = store.metadata().await.unwrap().first_message_at.unwrap();
        assert!(anchor >= msg.created_at);

        composer.send_text(Participant::User2, "hey yourself").await.unwrap();
        assert_eq!(store.metadata().await.unwrap().first_message_at, Some(anchor));
    }

    #[tokio::test]
    async fn voice_note_goes_through_the_uploader() {
        let (_, uploader, composer) = composer(RecordingUploader::default());
        let msg = composer.send_voice(Participant::User2, Bytes::from_static(b"opus")).await.unwrap();

        assert_eq!(msg.kind(), MessageKind::Voice);
        assert_eq!(msg.content.voice_url(), Some("https://blobs.example/audio/1"));
        assert_eq!(msg.content.text(), "");
        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads[0], (MediaCategory::Audio, VOICE_CONTENT_TYPE.to_string(), 4));
    }

    #[tokio::test]
    async fn files_are_classified_by_content_type() {
        let (_, _, composer) = composer(RecordingUploader::default());
        let image = composer.send_file(Participant::User1, Bytes::from_static(b"img"), "image/png").await.unwrap();
        assert_eq!(image.kind(), MessageKind::Image);
        assert!(image.content.image_url().is_some());

        let video = composer.send_file(Participant::User1, Bytes::from_static(b"vid"), "video/mp4").await.unwrap();
        assert_eq!(video.kind(), MessageKind::Video);
        assert!(video.content.video_url().is_some());
    }

    #[tokio::test]
    async fn unsupported_file_is_rejected_before_upload() {
        let (store, uploader, composer) = composer(RecordingUploader::default());
        let err = composer
            .send_file(Participant::User1, Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
        assert!(uploader.uploads.lock().unwrap().is_empty());
        assert!(store.list_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_creates_no_message() {
        let (store, _, composer) = composer(RecordingUploader {
            fail: true,
            ..Default::default()
        });
        let err = composer.send_voice(Participant::User1, Bytes::from_static(b"opus")).await.unwrap_err();
        assert!(matches!(err, ChatError::UploadFailed(_)));
        assert!(store.list_messages().await.unwrap().is_empty());
    }
}
