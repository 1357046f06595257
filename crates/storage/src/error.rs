//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Backend reachable but returned data it should not have (corrupt info file, etc.).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("offset mismatch: expected {expected}, current {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("write of {attempted} bytes would exceed declared length {declared}")]
    LengthExceeded { declared: u64, attempted: u64 },

    #[error("upload not complete: {0}")]
    NotComplete(String),
}

impl StorageError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Unavailable(_))
    }

    /// Map a `std::io::Error` to `NotFound` when the object is missing.
    pub(crate) fn from_io(key: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
