use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Storage and upload configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding every stored file (default: "files")
    pub storage_root: PathBuf,

    /// Port for the HTTP server (default: 8085)
    pub port: u16,

    /// Maximum upload size in bytes, for both direct and URL uploads (default: 45 MB)
    pub max_file_size: usize,

    /// Deadline for a whole remote fetch in seconds (default: 30)
    pub fetch_timeout_secs: u64,

    /// JPEG re-encode quality, 1-100 (default: 75)
    pub jpeg_quality: u8,

    /// Reject URL uploads that are not images (default: true).
    /// When false, non-images and undecodable images are stored as fetched.
    pub strict_image_normalization: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("files"),
            port: 8085,
            max_file_size: 45 * 1024 * 1024, // 45 MB
            fetch_timeout_secs: 30,
            jpeg_quality: 75,
            strict_image_normalization: true,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            storage_root: env::var("STORAGE_ROOT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.fetch_timeout_secs),

            jpeg_quality: env::var("JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse::<u8>().ok())
                .map(|q| q.clamp(1, 100))
                .unwrap_or(default.jpeg_quality),

            strict_image_normalization: env::var("STRICT_IMAGE_NORMALIZATION")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.strict_image_normalization),
        }
    }

    /// Create config for development (best-effort normalization)
    pub fn development() -> Self {
        Self {
            strict_image_normalization: false,
            ..Self::default()
        }
    }

    /// Same defaults rooted at a different directory, used by tests and the CLI
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
