//! Upload record repository.

use crate::error::MetadataResult;
use crate::models::UploadRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for upload record operations.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload record.
    ///
    /// Fails with `AlreadyExists` when the token is taken.
    async fn create_upload(&self, upload: &UploadRow) -> MetadataResult<()>;

    /// Get an upload record by token, complete or not.
    async fn get_upload(&self, token: &str) -> MetadataResult<Option<UploadRow>>;

    /// Get an upload record by token only if it is not yet complete.
    async fn get_incomplete_upload(&self, token: &str) -> MetadataResult<Option<UploadRow>>;

    /// Claim the right to finalize an incomplete upload until `expires_at`.
    ///
    /// Succeeds when no unexpired claim exists. Returns false if another
    /// caller holds the claim or the record is missing or complete.
    async fn claim_finalize(
        &self,
        token: &str,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Drop a finalize claim on an incomplete upload.
    async fn release_finalize(&self, token: &str) -> MetadataResult<()>;

    /// Atomically flip `is_complete` from false to true and clear any claim.
    /// Returns true if this call made the transition.
    /// Returns false if the record is missing or was already complete.
    async fn mark_complete(&self, token: &str, completed_at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Count records still accepting chunks.
    async fn count_incomplete_uploads(&self) -> MetadataResult<u64>;
}
