//! The upload manager.
//!
//! Completeness is never stored: it is derived by asking the chunk store
//! about every chunk in `1..=declared_chunk_count`. The only persisted state
//! change is the record's incomplete→complete transition, which happens at
//! most once per token.

use crate::error::{UploadError, UploadResult};
use crate::handler::{HandlerRegistry, UploadHandler};
use crate::locks::FinalizeLocks;
use quilt_core::config::{AppConfig, CombineConfig};
use quilt_core::{ChunkNumber, CombineMode, InitUpload, UploadRecord, UploadState, UploadToken};
use quilt_metadata::{MetadataError, MetadataStore, UploadRow};
use quilt_storage::{ByteStream, ChunkStore, CombineRequest, FileCombiner, limit_stream};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::instrument;

/// Fresh tokens tried before init gives up on a collision.
const MAX_TOKEN_ATTEMPTS: u32 = 3;

/// Extra lifetime of a finalize claim beyond the combine budget.
const CLAIM_GRACE: Duration = Duration::from_secs(30);

/// How often a finalize waiting on another process rechecks the record.
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Settings the manager needs from the application configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Bytes per chunk; the last chunk may be shorter.
    pub chunk_size: u64,
    pub combine: CombineConfig,
}

impl ManagerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.server.chunk_size,
            combine: config.combine.clone(),
        }
    }
}

/// Tracks chunk state, detects completion and finalizes uploads exactly once.
pub struct UploadManager {
    chunks: Arc<dyn ChunkStore>,
    combiner: Arc<dyn FileCombiner>,
    metadata: Arc<dyn MetadataStore>,
    handlers: HandlerRegistry,
    config: ManagerConfig,
    locks: FinalizeLocks,
}

impl UploadManager {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        combiner: Arc<dyn FileCombiner>,
        metadata: Arc<dyn MetadataStore>,
        handlers: HandlerRegistry,
        config: ManagerConfig,
    ) -> Self {
        Self {
            chunks,
            combiner,
            metadata,
            handlers,
            config,
            locks: FinalizeLocks::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    fn handler(&self, name: &str) -> UploadResult<Arc<dyn UploadHandler>> {
        self.handlers
            .get(name)
            .ok_or_else(|| UploadError::UnknownHandler(name.to_string()))
    }

    /// Validate a declared file against a handler and persist a new record.
    #[instrument(skip(self, request), fields(handler = %handler_name, size = request.size))]
    pub async fn init(&self, handler_name: &str, request: InitUpload) -> UploadResult<UploadRecord> {
        let handler = self.handler(handler_name)?;
        let client_payload = request.payload.clone().unwrap_or(Value::Null);

        let mut record = UploadRecord::new(
            UploadToken::generate(),
            handler_name,
            &request,
            self.config.chunk_size,
        )
        .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;

        handler
            .validate(&record, &client_payload)
            .await
            .map_err(|e| UploadError::Rejected(e.to_string()))?;
        record.payload = handler.payload(&record, client_payload).await;

        let mut attempt = 1;
        loop {
            let row = UploadRow::try_from(&record)?;
            match self.metadata.create_upload(&row).await {
                Ok(()) => break,
                Err(MetadataError::AlreadyExists(_)) if attempt < MAX_TOKEN_ATTEMPTS => {
                    tracing::warn!(attempt, "Upload token collision, regenerating");
                    record.token = UploadToken::generate();
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            token = ?record.token,
            chunks = record.declared_chunk_count,
            name = %record.original_name,
            "Upload initiated"
        );
        Ok(record)
    }

    /// Get an incomplete record by token.
    pub async fn incomplete_upload(&self, token: &UploadToken) -> UploadResult<UploadRecord> {
        let row = self
            .metadata
            .get_incomplete_upload(token.as_str())
            .await?
            .ok_or(UploadError::NotFound)?;
        Ok(UploadRecord::try_from(row)?)
    }

    /// Get a record by token whether or not it is complete.
    pub async fn upload(&self, token: &UploadToken) -> UploadResult<UploadRecord> {
        let row = self
            .metadata
            .get_upload(token.as_str())
            .await?
            .ok_or(UploadError::NotFound)?;
        Ok(UploadRecord::try_from(row)?)
    }

    /// Check whether a chunk has been stored.
    ///
    /// Numbers past the declared count simply report `false`.
    pub async fn has_completed_chunk(
        &self,
        record: &UploadRecord,
        chunk_number: i64,
    ) -> UploadResult<bool> {
        let chunk = ChunkNumber::try_from(chunk_number)?;
        Ok(self.chunks.exists(&record.token, chunk).await?)
    }

    /// Store one chunk, replacing any earlier copy. Returns the bytes written.
    #[instrument(skip(self, record, data), fields(token = ?record.token, chunk = chunk_number))]
    pub async fn handle_chunk(
        &self,
        record: &UploadRecord,
        chunk_number: i64,
        data: ByteStream,
    ) -> UploadResult<u64> {
        let chunk = ChunkNumber::try_from(chunk_number)?;
        if !record.contains_chunk(chunk) {
            return Err(UploadError::ChunkOutOfRange {
                chunk: chunk.get(),
                declared: record.declared_chunk_count,
            });
        }

        let data = limit_stream(data, self.config.chunk_size);
        let written = self.chunks.put_stream(&record.token, chunk, data).await?;

        // The record may have been finalized while the bytes were arriving,
        // after its chunks were cleaned up. Nothing else would remove this one.
        if self
            .metadata
            .get_incomplete_upload(record.token.as_str())
            .await?
            .is_none()
        {
            tracing::warn!("Chunk arrived after finalize, discarding");
            if let Err(e) = self.chunks.delete_upload(&record.token).await {
                tracing::warn!(error = %e, "Failed to discard late chunk");
            }
            return Err(UploadError::NotFound);
        }

        tracing::debug!(bytes = written, "Chunk stored");
        Ok(written)
    }

    /// Every declared chunk not yet stored, ascending.
    pub async fn missing_chunks(&self, record: &UploadRecord) -> UploadResult<Vec<ChunkNumber>> {
        let mut missing = Vec::new();
        for chunk in record.chunk_numbers() {
            if !self.chunks.exists(&record.token, chunk).await? {
                missing.push(chunk);
            }
        }
        Ok(missing)
    }

    /// The lowest declared chunk not yet stored.
    pub async fn first_missing_chunk(
        &self,
        record: &UploadRecord,
    ) -> UploadResult<Option<ChunkNumber>> {
        for chunk in record.chunk_numbers() {
            if !self.chunks.exists(&record.token, chunk).await? {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }

    /// Derive the current state of an upload.
    pub async fn state(&self, record: &UploadRecord) -> UploadResult<UploadState> {
        if record.is_complete {
            return Ok(UploadState::Complete);
        }
        if self.locks.is_held(record.token.as_str()) {
            return Ok(UploadState::Combining);
        }
        match self.first_missing_chunk(record).await? {
            None => Ok(UploadState::AllChunksPresent),
            Some(_) => Ok(UploadState::Initiated),
        }
    }

    /// Finalize an upload under the interactive combine budget.
    pub async fn process(&self, record: &UploadRecord) -> UploadResult<Value> {
        self.process_with(record, CombineMode::Interactive).await
    }

    /// Finalize an upload: combine its chunks, mark it complete, clean up,
    /// and return the handler's completion result.
    ///
    /// At most one call per token succeeds. Calls in this process queue on
    /// the token's lock; calls in other processes are excluded by a claim in
    /// the record store. Failures before the completion flag leave the
    /// record incomplete and the chunks intact.
    #[instrument(skip(self, record), fields(token = ?record.token, mode = ?mode))]
    pub async fn process_with(
        &self,
        record: &UploadRecord,
        mode: CombineMode,
    ) -> UploadResult<Value> {
        let _guard = self.locks.acquire(record.token.as_str()).await;

        // The caller's copy may predate another finalize.
        let current = self.claim_finalize(&record.token, mode).await?;

        let result = self.finalize_claimed(current, mode).await;
        if result.is_err()
            && let Err(e) = self.metadata.release_finalize(record.token.as_str()).await
        {
            tracing::warn!(error = %e, "Failed to release finalize claim");
        }
        result
    }

    /// Wait for the record-store claim on `token` and return the fresh record.
    ///
    /// The claim lasts for the combine budget plus a grace period, so a
    /// process that dies mid-combine only blocks the token until it expires.
    async fn claim_finalize(
        &self,
        token: &UploadToken,
        mode: CombineMode,
    ) -> UploadResult<UploadRecord> {
        let budget = self.config.combine.timeout(mode);
        let lease = budget + CLAIM_GRACE;
        let deadline = Instant::now() + budget;

        loop {
            let current = self.upload(token).await?;
            if current.is_complete {
                return Err(UploadError::AlreadyProcessed {
                    token: current.token,
                });
            }

            let now = OffsetDateTime::now_utc();
            if self
                .metadata
                .claim_finalize(token.as_str(), now, now + lease)
                .await?
            {
                return Ok(current);
            }

            if Instant::now() >= deadline {
                return Err(UploadError::FinalizeInProgress {
                    token: current.token,
                });
            }
            tracing::debug!("Finalize claimed elsewhere, waiting");
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
        }
    }

    async fn finalize_claimed(
        &self,
        mut current: UploadRecord,
        mode: CombineMode,
    ) -> UploadResult<Value> {
        if let Some(missing) = self.first_missing_chunk(&current).await? {
            return Err(UploadError::IncompleteUpload { missing });
        }

        let mut locations = Vec::with_capacity(current.declared_chunk_count as usize);
        for chunk in current.chunk_numbers() {
            locations.push(self.chunks.chunk_location(&current.token, chunk).await?);
        }

        let handler = self.handler(&current.handler)?;
        let destination = handler.destination(&current);
        let request = CombineRequest {
            chunks: locations,
            destination: destination.clone(),
            expected_size: Some(current.declared_size),
            timeout: self.config.combine.timeout(mode),
        };

        let started = Instant::now();
        let size = match self.combiner.combine(&request).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(
                    combiner = self.combiner.name(),
                    error = %e,
                    "Combine failed, upload left incomplete"
                );
                return Err(e.into());
            }
        };

        let completed_at = OffsetDateTime::now_utc();
        if !self
            .metadata
            .mark_complete(current.token.as_str(), completed_at)
            .await?
        {
            return Err(UploadError::AlreadyProcessed {
                token: current.token,
            });
        }
        current.is_complete = true;
        current.completed_at = Some(completed_at);

        tracing::info!(
            combiner = self.combiner.name(),
            size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            destination = %destination.display(),
            "Upload finalized"
        );

        if let Err(e) = self.chunks.delete_upload(&current.token).await {
            tracing::warn!(error = %e, "Failed to clean up chunks after finalize");
        }

        Ok(handler.completed(&current, &destination).await?)
    }

    /// Check that the chunk store and record store are usable.
    pub async fn health_check(&self) -> UploadResult<()> {
        self.chunks.health_check().await?;
        self.metadata.health_check().await?;
        Ok(())
    }
}
