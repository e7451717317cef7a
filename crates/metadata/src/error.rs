//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Check whether the error is likely transient (lock contention, pool
    /// exhaustion, I/O) rather than a logic or data error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
