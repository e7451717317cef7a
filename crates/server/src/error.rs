//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quilt_manager::UploadError;
use quilt_metadata::MetadataError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("core error: {0}")]
    Core(#[from] quilt_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Core(quilt_core::Error::InvalidToken(_)) => "invalid_token",
            Self::Core(_) => "bad_request",
            Self::Upload(e) => match e {
                UploadError::IncompleteUpload { .. } => "incomplete_upload",
                UploadError::AlreadyProcessed { .. } => "already_processed",
                UploadError::FinalizeInProgress { .. } => "finalize_in_progress",
                UploadError::Storage(_) => "storage_error",
                UploadError::ChunkTooLarge { .. } => "chunk_too_large",
                UploadError::CombineFailure(_) => "combine_failed",
                UploadError::CombineTimeout { .. } => "combine_timeout",
                UploadError::InvalidChunkNumber(_) => "invalid_chunk_number",
                UploadError::ChunkOutOfRange { .. } => "chunk_out_of_range",
                UploadError::NotFound => "upload_not_found",
                UploadError::UnknownHandler(_) => "unknown_handler",
                UploadError::InvalidRequest(_) => "invalid_request",
                UploadError::Rejected(_) => "upload_rejected",
                UploadError::Handler(_) => "handler_error",
                UploadError::Metadata(_) => "metadata_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Upload(e) => match e {
                UploadError::IncompleteUpload { .. }
                | UploadError::AlreadyProcessed { .. }
                | UploadError::FinalizeInProgress { .. } => StatusCode::CONFLICT,
                UploadError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::ChunkTooLarge { .. }
                | UploadError::InvalidChunkNumber(_)
                | UploadError::ChunkOutOfRange { .. }
                | UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                UploadError::CombineFailure(_) | UploadError::Handler(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                UploadError::CombineTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                UploadError::NotFound | UploadError::UnknownHandler(_) => StatusCode::NOT_FOUND,
                UploadError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                UploadError::Metadata(MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
                UploadError::Metadata(m) if m.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        crate::metrics::record_upload_error(self.code());
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
