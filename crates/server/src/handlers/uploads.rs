//! Upload transport handlers.
//!
//! These resolve tokens to records and delegate everything else to the
//! upload manager. Only incomplete records are resolvable for chunk and
//! complete requests, so a finalized token answers 404.

use crate::error::ApiResult;
use crate::metrics::{
    BYTES_UPLOADED, CHUNK_UPLOAD_DURATION, CHUNKS_UPLOADED, FINALIZE_DURATION,
    FINALIZES_IN_PROGRESS, GaugeGuard, UPLOADS_COMPLETED, UPLOADS_INITIATED,
};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use futures::TryStreamExt;
use quilt_core::upload::{
    ChunkQuery, CompleteUploadRequest, InitUploadRequest, InitUploadResponse,
    UploadStatusResponse,
};
use quilt_core::{UploadRecord, UploadState, UploadToken};
use quilt_manager::{UploadError, UploadResult};
use quilt_storage::{ByteStream, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;

async fn resolve_incomplete(state: &AppState, token: &str) -> ApiResult<UploadRecord> {
    let token = UploadToken::parse(token)?;
    Ok(state.manager.incomplete_upload(&token).await?)
}

/// POST /upload/init - Start a new upload.
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> ApiResult<Json<InitUploadResponse>> {
    let record = state.manager.init(&req.handler, req.upload).await?;
    UPLOADS_INITIATED.inc();

    Ok(Json(InitUploadResponse {
        success: true,
        token: record.token.as_str().to_string(),
    }))
}

/// GET /upload - Report whether a chunk is already stored.
///
/// Answers 200 when present and 204 when the client still needs to send it.
pub async fn check_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
) -> ApiResult<StatusCode> {
    let record = resolve_incomplete(&state, &query.token).await?;
    if state
        .manager
        .has_completed_chunk(&record, query.chunk_number)
        .await?
    {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

/// Response from `POST /upload`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk: i64,
    pub bytes: u64,
}

/// POST /upload - Store one chunk from the raw request body.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let start_time = Instant::now();
    let record = resolve_incomplete(&state, &query.token).await?;

    // Reject declared oversize bodies before reading them.
    let limit = state.manager.config().chunk_size;
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        && length > limit
    {
        return Err(UploadError::ChunkTooLarge { limit }.into());
    }

    let data: ByteStream = Box::pin(
        body.into_data_stream()
            .map_err(|e| StorageError::Source(e.to_string())),
    );
    let bytes = state
        .manager
        .handle_chunk(&record, query.chunk_number, data)
        .await?;

    CHUNKS_UPLOADED.inc();
    BYTES_UPLOADED.inc_by(bytes);
    CHUNK_UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());

    Ok(Json(ChunkUploadResponse {
        success: true,
        chunk: query.chunk_number,
        bytes,
    }))
}

/// POST /upload/complete - Combine the chunks and finalize the upload.
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(req): Json<CompleteUploadRequest>,
) -> ApiResult<Json<Value>> {
    let record = resolve_incomplete(&state, &req.token).await?;

    let start_time = Instant::now();
    let result = {
        let _in_flight = GaugeGuard::new(&FINALIZES_IN_PROGRESS);
        state.manager.process(&record).await
    };
    if result.is_ok() {
        UPLOADS_COMPLETED.inc();
        FINALIZE_DURATION.observe(start_time.elapsed().as_secs_f64());
    }
    Ok(Json(completion_response(result)?))
}

/// A duplicate complete that lost the race to another request succeeds too.
fn completion_response(result: UploadResult<Value>) -> ApiResult<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(UploadError::AlreadyProcessed { token }) => {
            tracing::info!(token = ?token, "Duplicate complete request");
            Ok(json!({
                "success": true,
                "token": token.as_str(),
                "already_processed": true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

/// Query for `GET /upload/status`.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub token: String,
}

/// GET /upload/status - Report the derived state and missing chunks.
pub async fn upload_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let token = UploadToken::parse(&query.token)?;
    let record = state.manager.upload(&token).await?;
    let upload_state = state.manager.state(&record).await?;

    let missing: Vec<u32> = if upload_state == UploadState::Complete {
        Vec::new()
    } else {
        state
            .manager
            .missing_chunks(&record)
            .await?
            .into_iter()
            .map(|c| c.get())
            .collect()
    };

    Ok(Json(UploadStatusResponse {
        token: record.token.as_str().to_string(),
        state: upload_state,
        declared_chunk_count: record.declared_chunk_count,
        received: record.declared_chunk_count - missing.len() as u32,
        missing,
    }))
}
