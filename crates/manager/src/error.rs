//! Upload manager error types.

use crate::handler::HandlerError;
use quilt_core::{ChunkNumber, UploadToken};
use quilt_metadata::MetadataError;
use quilt_storage::{CombineError, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::UploadManager`] operations.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload is incomplete: chunk {missing} is missing")]
    IncompleteUpload { missing: ChunkNumber },

    #[error("upload {token} was already processed")]
    AlreadyProcessed { token: UploadToken },

    #[error("upload {token} is being finalized elsewhere")]
    FinalizeInProgress { token: UploadToken },

    #[error("chunk storage failed: {0}")]
    Storage(StorageError),

    #[error("chunk exceeds the {limit} byte chunk size")]
    ChunkTooLarge { limit: u64 },

    #[error("combine failed: {0}")]
    CombineFailure(String),

    #[error("combine timed out after {}s", .timeout.as_secs())]
    CombineTimeout { timeout: Duration },

    #[error("invalid chunk number: {0}")]
    InvalidChunkNumber(i64),

    #[error("chunk {chunk} is outside the declared range 1..={declared}")]
    ChunkOutOfRange { chunk: u32, declared: u32 },

    #[error("upload not found")]
    NotFound,

    #[error("unknown upload handler: {0}")]
    UnknownHandler(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("upload handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl UploadError {
    /// Check whether repeating the same call may succeed.
    ///
    /// Finalize failures of this kind leave the record incomplete and the
    /// chunks in place.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(_)
            | Self::FinalizeInProgress { .. }
            | Self::CombineFailure(_)
            | Self::CombineTimeout { .. } => true,
            Self::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TooLarge { limit } => Self::ChunkTooLarge { limit },
            other => Self::Storage(other),
        }
    }
}

impl From<CombineError> for UploadError {
    fn from(e: CombineError) -> Self {
        match e {
            CombineError::Timeout(timeout) => Self::CombineTimeout { timeout },
            other => Self::CombineFailure(other.to_string()),
        }
    }
}

impl From<quilt_core::Error> for UploadError {
    fn from(e: quilt_core::Error) -> Self {
        match e {
            quilt_core::Error::InvalidChunkNumber(n) => Self::InvalidChunkNumber(n),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

/// Result type for upload manager operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_errors_map_to_taxonomy() {
        let timeout: UploadError = CombineError::Timeout(Duration::from_secs(60)).into();
        assert!(matches!(timeout, UploadError::CombineTimeout { timeout } if timeout.as_secs() == 60));
        assert!(timeout.is_retryable());

        let failure: UploadError = CombineError::SizeMismatch {
            expected: 3,
            actual: 2,
        }
        .into();
        assert!(matches!(failure, UploadError::CombineFailure(_)));
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_oversized_chunk_is_not_storage_failure() {
        let err: UploadError = StorageError::TooLarge { limit: 10 }.into();
        assert!(matches!(err, UploadError::ChunkTooLarge { limit: 10 }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_terminal_errors_not_retryable() {
        assert!(!UploadError::AlreadyProcessed {
            token: UploadToken::generate()
        }
        .is_retryable());
        assert!(!UploadError::IncompleteUpload {
            missing: ChunkNumber::FIRST
        }
        .is_retryable());
        assert!(!UploadError::NotFound.is_retryable());
    }

    #[test]
    fn test_core_chunk_error_keeps_number() {
        let err: UploadError = quilt_core::Error::InvalidChunkNumber(0).into();
        assert!(matches!(err, UploadError::InvalidChunkNumber(0)));
    }
}
