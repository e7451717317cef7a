//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid chunk number: {0} (chunk numbers start at 1)")]
    InvalidChunkNumber(i64),

    #[error("invalid chunk size: {size} (must be between {min} and {max})")]
    InvalidChunkSize { size: u64, min: u64, max: u64 },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
