use crate::api::error::AppError;
use crate::config::StorageConfig;
use crate::services::image_normalizer::{ImageNormalizer, NormalizeError, NormalizePolicy};
use crate::services::remote_fetch::RemoteFetcher;
use crate::services::storage::{SizeLimitExceeded, StorageService, StoredObject};
use crate::utils::naming::{display_name, sanitize_filename, storage_name, validate_storage_name};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

/// Failure raised by the client's upload body rather than by the disk.
///
/// Transport layers wrap it in an `io::Error` so the storage copy can tell a
/// broken request apart from a storage failure.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("Request body exceeds the maximum allowed limit")]
    TooLarge,

    #[error("Malformed upload body: {0}")]
    Malformed(String),
}

/// A stored file opened for download.
pub struct Download {
    pub object: StoredObject,
    pub content_type: mime::Mime,
    pub display_name: String,
}

pub struct FileService {
    storage: Arc<dyn StorageService>,
    fetcher: RemoteFetcher,
    normalizer: Arc<ImageNormalizer>,
    config: StorageConfig,
}

impl FileService {
    pub fn new(storage: Arc<dyn StorageService>, config: StorageConfig) -> anyhow::Result<Self> {
        let fetcher = RemoteFetcher::new(config.fetch_timeout(), config.max_file_size)?;
        let normalizer = Arc::new(ImageNormalizer::new(
            config.jpeg_quality,
            NormalizePolicy::from_strict(config.strict_image_normalization),
        ));

        Ok(Self {
            storage,
            fetcher,
            normalizer,
            config,
        })
    }

    pub fn max_file_size(&self) -> usize {
        self.config.max_file_size
    }

    /// Stores `reader` as `<now>_<original_name>` and returns the storage name.
    pub async fn upload<'a>(
        &self,
        original_name: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<String, AppError> {
        let filename =
            sanitize_filename(original_name).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let name = storage_name(Utc::now().timestamp(), &filename);

        let result = self
            .storage
            .upload_stream(&name, reader, self.config.max_file_size as u64)
            .await
            .map_err(|e| self.classify_storage_error(e))?;

        info!("💾 Stored upload {} ({} bytes)", result.storage_name, result.size);
        Ok(result.storage_name)
    }

    /// Fetches `source_url`, normalizes the payload and stores it.
    ///
    /// The stored name is `target_name` verbatim when `no_timestamp` is set,
    /// otherwise `<now>_<target_name>`.
    pub async fn upload_from_url(
        &self,
        source_url: &str,
        target_name: &str,
        no_timestamp: bool,
    ) -> Result<String, AppError> {
        let url = RemoteFetcher::parse_url(source_url)?;
        let filename =
            sanitize_filename(target_name).map_err(|e| AppError::BadRequest(e.to_string()))?;

        let data = self.fetcher.fetch(&url).await?;
        let fetched_size = data.len();

        let normalizer = self.normalizer.clone();
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(data))
            .await
            .map_err(|e| AppError::Internal(format!("Image normalization task failed: {}", e)))?
            .map_err(|e| match e {
                NormalizeError::UnrecognizedFormat => AppError::UnsupportedImageFormat,
                other => AppError::ImageProcessing(other.to_string()),
            })?;

        let name = if no_timestamp {
            filename
        } else {
            storage_name(Utc::now().timestamp(), &filename)
        };

        self.storage
            .upload_file(&name, &normalized.data)
            .await
            .map_err(|e| self.classify_storage_error(e))?;

        info!(
            "🌐 Stored {} from {} ({:?}, {} -> {} bytes)",
            name,
            url,
            normalized.outcome,
            fetched_size,
            normalized.data.len()
        );
        Ok(name)
    }

    /// Opens a stored file and resolves its download headers.
    pub async fn open_download(&self, name: &str) -> Result<Download, AppError> {
        let not_found = || AppError::NotFound("File not found.".to_string());

        if !validate_storage_name(name) {
            return Err(not_found());
        }

        let object = self
            .storage
            .open_file(name)
            .await
            .map_err(|e| self.classify_storage_error(e))?
            .ok_or_else(not_found)?;

        Ok(Download {
            object,
            content_type: mime_guess::from_path(name).first_or_octet_stream(),
            display_name: display_name(name).to_string(),
        })
    }

    fn classify_storage_error(&self, err: anyhow::Error) -> AppError {
        if err.downcast_ref::<SizeLimitExceeded>().is_some() {
            return AppError::PayloadTooLarge(format!(
                "File is too large (limit {} MB)",
                self.config.max_file_size / 1024 / 1024
            ));
        }

        match err.downcast::<std::io::Error>() {
            Ok(io_err) => {
                let body_error = match io_err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<BodyError>())
                {
                    Some(BodyError::TooLarge) => {
                        Some(AppError::PayloadTooLarge(BodyError::TooLarge.to_string()))
                    }
                    Some(malformed @ BodyError::Malformed(_)) => {
                        Some(AppError::BadRequest(malformed.to_string()))
                    }
                    None => None,
                };
                body_error.unwrap_or_else(|| AppError::StorageIo(io_err))
            }
            Err(other) => AppError::Anyhow(other),
        }
    }
}
