//! Media storage on the backend's file bucket
//!
//! Handles upload, delete, and preview URL generation for post images.

use std::sync::Arc;

use crate::backend::{Backend, StoredFile};
use crate::config::MediaConfig;
use crate::data::{EntityId, MediaUpload};
use crate::error::AppError;
use crate::metrics::{MEDIA_BYTES_UPLOADED, MEDIA_UPLOADS_TOTAL, observe_backend};

/// A file that made it into the bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub file: StoredFile,
    /// Public preview URL
    pub url: String,
}

/// Media storage service
pub struct MediaStorage {
    backend: Arc<dyn Backend>,
    config: MediaConfig,
}

impl MediaStorage {
    pub fn new(backend: Arc<dyn Backend>, config: MediaConfig) -> Self {
        Self { backend, config }
    }

    /// Reject uploads the bucket would not accept
    pub fn validate(&self, upload: &MediaUpload) -> Result<(), AppError> {
        if upload.bytes.is_empty() {
            return Err(AppError::Validation("file is empty".to_string()));
        }
        if upload.bytes.len() > self.config.max_upload_bytes {
            return Err(AppError::Validation(format!(
                "file too large: {} bytes (max {})",
                upload.bytes.len(),
                self.config.max_upload_bytes
            )));
        }
        if !self
            .config
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&upload.content_type))
        {
            return Err(AppError::Validation(format!(
                "unsupported file type: {}",
                upload.content_type
            )));
        }
        Ok(())
    }

    /// Upload a file and resolve its preview URL
    ///
    /// If the backend hands back no preview URL the file is deleted again
    /// and the upload fails.
    ///
    /// # Example
    /// ```ignore
    /// let stored = storage.upload(&upload).await?;
    /// // stored.url: https://cloud.appwrite.io/v1/storage/buckets/.../preview?...
    /// ```
    pub async fn upload(&self, upload: &MediaUpload) -> Result<StoredMedia, AppError> {
        self.validate(upload)?;

        let file_id = EntityId::new().0;
        let file = observe_backend(
            "create_file",
            self.backend.create_file(&file_id, upload),
        )
        .await
        .map_err(|error| match error {
            AppError::Backend { .. } | AppError::Decode(_) => {
                AppError::Storage(format!("upload failed: {}", error))
            }
            other => other,
        })?;

        MEDIA_UPLOADS_TOTAL.inc();
        MEDIA_BYTES_UPLOADED.inc_by(upload.bytes.len() as f64);

        let url = self.backend.file_preview_url(&file.id);
        if url.is_empty() {
            self.delete(&file.id).await;
            return Err(AppError::Storage(format!(
                "no preview URL for file {}",
                file.id
            )));
        }

        tracing::debug!(
            file_id = %file.id,
            extension = extension_for(&upload.content_type),
            size = upload.bytes.len(),
            "Uploaded media"
        );
        Ok(StoredMedia { file, url })
    }

    /// Delete a file, logging instead of failing
    ///
    /// Used for cleanup after a failed write; the caller reports the write
    /// error, not this one.
    pub async fn delete(&self, file_id: &str) {
        if let Err(error) = observe_backend("delete_file", self.backend.delete_file(file_id)).await
        {
            tracing::warn!(file_id, %error, "Failed to delete media file");
        }
    }
}

/// File extension for a MIME type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MockBackend};

    fn png(len: usize) -> MediaUpload {
        MediaUpload {
            file_name: "photo.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![7; len],
        }
    }

    #[tokio::test]
    async fn upload_stores_file_and_returns_preview() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = MediaStorage::new(backend.clone(), MediaConfig::default());

        let stored = storage.upload(&png(16)).await.unwrap();
        assert_eq!(stored.file.size, 16);
        assert!(stored.url.contains(&stored.file.id));
        assert_eq!(backend.file_count().await, 1);

        storage.delete(&stored.file.id).await;
        assert_eq!(backend.file_count().await, 0);
    }

    #[tokio::test]
    async fn rejects_oversized_and_unknown_types() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = MediaStorage::new(
            backend.clone(),
            MediaConfig {
                max_upload_bytes: 8,
                ..MediaConfig::default()
            },
        );

        assert!(matches!(
            storage.upload(&png(9)).await,
            Err(AppError::Validation(_))
        ));

        let mut pdf = png(4);
        pdf.content_type = "application/pdf".to_string();
        assert!(matches!(
            storage.upload(&pdf).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(backend.request_count("create_file"), 0);
    }

    #[tokio::test]
    async fn missing_preview_url_deletes_the_upload() {
        let mut backend = MockBackend::new();
        backend.expect_create_file().returning(|file_id, upload| {
            Ok(StoredFile {
                id: file_id.to_string(),
                name: upload.file_name.clone(),
                mime_type: upload.content_type.clone(),
                size: upload.bytes.len() as u64,
            })
        });
        backend.expect_file_preview_url().returning(|_| String::new());
        backend.expect_delete_file().times(1).returning(|_| Ok(()));

        let storage = MediaStorage::new(Arc::new(backend), MediaConfig::default());
        assert!(matches!(
            storage.upload(&png(4)).await,
            Err(AppError::Storage(_))
        ));
    }

    #[test]
    fn extension_map() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/svg+xml"), "svg");
        assert_eq!(extension_for("video/mp4"), "bin");
    }
}
