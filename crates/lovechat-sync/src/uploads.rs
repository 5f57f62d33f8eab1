use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use lovechat_types::models::MediaCategory;

use crate::error::ChatError;

/// 50 MB upload limit per blob
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;

/// Blob storage for media messages: takes bytes, hands back a URL anyone in
/// the chat can fetch.
pub trait BlobUploader: Send + Sync + 'static {
    fn upload(
        &self,
        bytes: Bytes,
        category: MediaCategory,
        content_type: &str,
    ) -> impl Future<Output = Result<String, ChatError>> + Send;
}

/// Stores blobs as flat files under `{dir}/{folder}/{uuid}.{ext}` and serves
/// them from `{public_base}/media/...`.
pub struct LocalBlobStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self, ChatError> {
        for category in [MediaCategory::Audio, MediaCategory::Image, MediaCategory::Video] {
            fs::create_dir_all(dir.join(folder(category)))
                .await
                .map_err(|e| ChatError::Unavailable(format!("media dir {}: {e}", dir.display())))?;
        }
        info!("Media storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }
}

impl BlobUploader for LocalBlobStore {
    async fn upload(&self, bytes: Bytes, category: MediaCategory, content_type: &str) -> Result<String, ChatError> {
        if bytes.is_empty() {
            return Err(ChatError::ValidationFailed("empty upload".into()));
        }
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(ChatError::ValidationFailed(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                MAX_BLOB_SIZE
            )));
        }

        let name = format!("{}.{}", Uuid::new_v4(), extension(category, content_type));
        let relative = format!("{}/{}", folder(category), name);
        let path = self.dir.join(folder(category)).join(&name);

        let file = fs::File::create(&path).await.map_err(|e| {
            error!("Failed to create blob {}: {}", path.display(), e);
            ChatError::UploadFailed(e.to_string())
        })?;
        write_or_discard(&path, file, &bytes).await?;

        info!("Stored {} blob {} ({} bytes)", category.as_str(), relative, bytes.len());
        Ok(format!("{}/media/{}", self.public_base, relative))
    }
}

/// Write the whole blob through `sink`. On failure the partial file at
/// `path` is removed so no truncated media is ever served.
async fn write_or_discard<W: AsyncWrite + Unpin>(path: &Path, mut sink: W, bytes: &[u8]) -> Result<(), ChatError> {
    let written = async {
        sink.write_all(bytes).await?;
        sink.flush().await
    }
    .await;
    drop(sink);

    if let Err(e) = written {
        error!("Failed to write blob {}: {}", path.display(), e);
        if let Err(rm) = fs::remove_file(path).await {
            warn!("Could not remove partial blob {}: {}", path.display(), rm);
        }
        return Err(ChatError::UploadFailed(e.to_string()));
    }
    Ok(())
}

fn folder(category: MediaCategory) -> &'static str {
    match category {
        MediaCategory::Audio => "voice-notes",
        MediaCategory::Image => "images",
        MediaCategory::Video => "videos",
    }
}

/// File extension for a blob, from its declared content type.
fn extension(category: MediaCategory, content_type: &str) -> String {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let known = match essence.as_str() {
        "audio/webm" | "video/webm" => Some("webm"),
        "audio/ogg" => Some("ogg"),
        "audio/mp4" => Some("m4a"),
        "audio/mpeg" => Some("mp3"),
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    let subtype: String = essence
        .split_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    if !subtype.is_empty() {
        return subtype;
    }

    match category {
        MediaCategory::Audio => "webm".to_string(),
        _ => "bin".to_string(),
    }
}
