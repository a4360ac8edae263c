use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug)]
pub struct UploadResult {
    pub storage_name: String,
    pub size: u64,
}

#[derive(Debug)]
pub struct FileMetadata {
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// An opened stored file ready to be streamed.
pub struct StoredObject {
    pub file: File,
    pub metadata: FileMetadata,
}

/// Returned by [`StorageService::upload_stream`] when the reader yields more
/// than the permitted number of bytes. The partial file has been removed.
#[derive(Debug, thiserror::Error)]
#[error("stream exceeded the limit of {limit} bytes")]
pub struct SizeLimitExceeded {
    pub limit: u64,
}

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Streams `reader` into `name`, replacing any existing file.
    ///
    /// Fails with [`SizeLimitExceeded`] when more than `max_size` bytes are
    /// read. On any failure the partially written file is removed.
    async fn upload_stream<'a>(
        &self,
        name: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        max_size: u64,
    ) -> Result<UploadResult>;
    async fn upload_file(&self, name: &str, data: &[u8]) -> Result<()>;
    /// `Ok(None)` when no file is stored under `name`.
    async fn open_file(&self, name: &str) -> Result<Option<StoredObject>>;
    async fn is_available(&self) -> bool;
}

/// Stores files flat in a single directory on the local filesystem.
pub struct LocalStorageService {
    root: PathBuf,
}

impl LocalStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn upload_stream<'a>(
        &self,
        name: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        max_size: u64,
    ) -> Result<UploadResult> {
        let path = self.path_for(name);
        let mut file = File::create(&path).await?;

        // One extra byte tells "exactly at the limit" apart from "over it".
        let mut limited = reader.take(max_size.saturating_add(1));
        let copied = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                self.discard(&path).await;
                return Err(e.into());
            }
        };

        if copied > max_size {
            drop(file);
            self.discard(&path).await;
            return Err(SizeLimitExceeded { limit: max_size }.into());
        }

        if let Err(e) = file.flush().await {
            drop(file);
            self.discard(&path).await;
            return Err(e.into());
        }

        Ok(UploadResult {
            storage_name: name.to_string(),
            size: copied,
        })
    }

    async fn upload_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        let mut file = File::create(&path).await?;
        if let Err(e) = file.write_all(data).await {
            drop(file);
            self.discard(&path).await;
            return Err(e.into());
        }
        file.flush().await?;
        Ok(())
    }

    async fn open_file(&self, name: &str) -> Result<Option<StoredObject>> {
        let file = match File::open(self.path_for(name)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Ok(None);
        }

        Ok(Some(StoredObject {
            file,
            metadata: FileMetadata {
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                size: meta.len(),
            },
        }))
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}
