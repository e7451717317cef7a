//! Storage error types.

use std::time::Duration;
use thiserror::Error;

/// Chunk storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("chunk not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("chunk source failed: {0}")]
    Source(String),

    #[error("chunk exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// File combine errors.
///
/// None of these leave a file at the destination path.
#[derive(Debug, Error)]
pub enum CombineError {
    #[error("combine exceeded its {}s budget", .0.as_secs())]
    Timeout(Duration),

    #[error("combined size mismatch: expected {expected} bytes, wrote {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("combine produced no output at {0}")]
    NoOutput(String),

    #[error("combine command failed: {0}")]
    Command(String),

    #[error("nothing to combine")]
    Empty,

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("I/O error during combine: {0}")]
    Io(#[from] std::io::Error),
}

impl CombineError {
    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for combine operations.
pub type CombineResult<T> = std::result::Result<T, CombineError>;
