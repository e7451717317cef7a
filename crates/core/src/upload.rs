//! Upload record types and lifecycle.

use crate::chunk::{ChunkNumber, chunk_count};
use crate::token::UploadToken;
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;

/// Upload lifecycle state.
///
/// The state is derived from the record and the chunk store, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Record created, chunks still arriving.
    Initiated,
    /// Every declared chunk is present.
    AllChunksPresent,
    /// The finalize transaction is running.
    Combining,
    /// The final file exists and the record is complete.
    Complete,
}

impl UploadState {
    /// Check if chunks may still be written.
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, Self::Initiated | Self::AllChunksPresent)
    }

    /// Check if the upload reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::AllChunksPresent => "all_chunks_present",
            Self::Combining => "combining",
            Self::Complete => "complete",
        }
    }
}

/// One upload attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Primary lookup key.
    pub token: UploadToken,
    /// Total byte length of the final file.
    pub declared_size: u64,
    /// `ceil(declared_size / chunk_size)`.
    pub declared_chunk_count: u32,
    /// Client-supplied file name, reduced to its basename.
    pub original_name: String,
    pub mime_type: String,
    /// Extension of `original_name` without the dot, empty when absent.
    pub extension: String,
    /// Name of the handler policy governing this upload.
    pub handler: String,
    /// Handler-defined data attached at init.
    pub payload: serde_json::Value,
    pub is_complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl UploadRecord {
    /// Build a new, incomplete record from an init request.
    ///
    /// The payload starts out as the client-supplied value; handlers replace
    /// it before the record is persisted.
    pub fn new(
        token: UploadToken,
        handler: impl Into<String>,
        request: &InitUpload,
        chunk_size: u64,
    ) -> crate::Result<Self> {
        if request.size == 0 {
            return Err(crate::Error::InvalidUpload(
                "size must be at least 1 byte".to_string(),
            ));
        }
        let original_name = basename(&request.name);
        if original_name.is_empty() {
            return Err(crate::Error::InvalidUpload(
                "name must not be empty".to_string(),
            ));
        }
        if request.mime_type.trim().is_empty() {
            return Err(crate::Error::InvalidUpload(
                "type must not be empty".to_string(),
            ));
        }

        Ok(Self {
            token,
            declared_size: request.size,
            declared_chunk_count: chunk_count(request.size, chunk_size)?,
            extension: extension_of(&original_name),
            original_name,
            mime_type: request.mime_type.clone(),
            handler: handler.into(),
            payload: request.payload.clone().unwrap_or(serde_json::Value::Null),
            is_complete: false,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        })
    }

    /// Check whether `chunk` lies within the declared chunk range.
    pub fn contains_chunk(&self, chunk: ChunkNumber) -> bool {
        chunk.get() <= self.declared_chunk_count
    }

    /// All declared chunk numbers in combine order.
    pub fn chunk_numbers(&self) -> impl DoubleEndedIterator<Item = ChunkNumber> + Clone {
        ChunkNumber::range(self.declared_chunk_count)
    }
}

fn basename(name: &str) -> String {
    // Clients on Windows send backslash-separated paths.
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    last.trim().to_string()
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Request to start an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUpload {
    /// Total file size in bytes.
    pub size: u64,
    /// Original file name.
    pub name: String,
    /// MIME type as reported by the client.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Handler-specific data.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Body of `POST /upload/init`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    /// Handler policy name.
    pub handler: String,
    #[serde(flatten)]
    pub upload: InitUpload,
}

/// Response from `POST /upload/init`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub success: bool,
    pub token: String,
}

/// Query parameters identifying a chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub token: String,
    #[serde(rename = "resumableChunkNumber")]
    pub chunk_number: i64,
}

/// Body of `POST /upload/complete`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub token: String,
}

/// Response from `GET /upload/status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub token: String,
    pub state: UploadState,
    pub declared_chunk_count: u32,
    pub received: u32,
    /// Missing chunk numbers in ascending order.
    pub missing: Vec<u32>,
}
