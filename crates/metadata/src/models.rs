//! Database models mapping to the metadata schema.

use crate::error::MetadataError;
use quilt_core::{UploadRecord, UploadToken};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Upload record row.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub token: String,
    pub declared_size: i64,
    pub declared_chunk_count: i64,
    pub original_name: String,
    pub mime_type: String,
    pub extension: String,
    pub handler: String,
    /// JSON-encoded handler payload.
    pub payload: String,
    pub is_complete: bool,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl TryFrom<&UploadRecord> for UploadRow {
    type Error = MetadataError;

    fn try_from(record: &UploadRecord) -> Result<Self, Self::Error> {
        let declared_size = i64::try_from(record.declared_size).map_err(|_| {
            MetadataError::InvalidRow(format!(
                "declared_size {} exceeds the storable range",
                record.declared_size
            ))
        })?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| MetadataError::InvalidRow(format!("payload: {e}")))?;

        Ok(Self {
            token: record.token.as_str().to_string(),
            declared_size,
            declared_chunk_count: i64::from(record.declared_chunk_count),
            original_name: record.original_name.clone(),
            mime_type: record.mime_type.clone(),
            extension: record.extension.clone(),
            handler: record.handler.clone(),
            payload,
            is_complete: record.is_complete,
            created_at: record.created_at,
            completed_at: record.completed_at,
        })
    }
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = MetadataError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let token = UploadToken::parse(&row.token)
            .map_err(|e| MetadataError::InvalidRow(format!("token: {e}")))?;
        let declared_size = u64::try_from(row.declared_size).map_err(|_| {
            MetadataError::InvalidRow(format!("negative declared_size {}", row.declared_size))
        })?;
        let declared_chunk_count = u32::try_from(row.declared_chunk_count).map_err(|_| {
            MetadataError::InvalidRow(format!(
                "declared_chunk_count {} out of range",
                row.declared_chunk_count
            ))
        })?;
        let payload = serde_json::from_str(&row.payload)
            .map_err(|e| MetadataError::InvalidRow(format!("payload: {e}")))?;

        Ok(Self {
            token,
            declared_size,
            declared_chunk_count,
            original_name: row.original_name,
            mime_type: row.mime_type,
            extension: row.extension,
            handler: row.handler,
            payload,
            is_complete: row.is_complete,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}
