//! Storage-name scheme.
//!
//! A stored file is named `<unix seconds>_<original name>`. The timestamp is
//! separated from the original name by the FIRST underscore, so the original
//! may contain underscores of its own. The name on disk is the only record of
//! an upload.

use thiserror::Error;

/// Fallback used when a multipart part carries no file name.
pub const DEFAULT_FILENAME: &str = "unnamed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilenameError {
    #[error("INVALID_FILENAME: file name is empty")]
    Empty,

    #[error("INVALID_FILENAME: '{0}' is not a valid file name")]
    Reserved(String),

    #[error("INVALID_FILENAME: file name contains control characters")]
    ControlCharacters,
}

/// Builds the storage name for an upload made at `timestamp`.
pub fn storage_name(timestamp: i64, original: &str) -> String {
    format!("{}_{}", timestamp, original)
}

/// Strips the `<digits>_` prefix from a storage name.
///
/// Names without an underscore, or whose text before the first underscore is
/// not all ASCII digits, are returned unchanged (e.g. files stored with
/// `no_timestamp`).
pub fn display_name(storage_name: &str) -> &str {
    match storage_name.split_once('_') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => storage_name,
    }
}

/// Reduces a client-supplied file name to a single safe path segment.
///
/// Browsers on some platforms send the full client path, so everything up to
/// the last `/` or `\` is dropped.
pub fn sanitize_filename(raw: &str) -> Result<String, FilenameError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    if base.is_empty() {
        return Err(FilenameError::Empty);
    }
    if base == "." || base == ".." {
        return Err(FilenameError::Reserved(base.to_string()));
    }
    if base.chars().any(|c| c.is_control()) {
        return Err(FilenameError::ControlCharacters);
    }

    Ok(base.to_string())
}

/// Whether `name` can be looked up directly under the storage root.
pub fn validate_storage_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
