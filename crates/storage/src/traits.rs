//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use quilt_core::{ChunkNumber, UploadToken};
use std::path::PathBuf;
use std::pin::Pin;

/// A boxed stream of bytes feeding a chunk write.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a single-item [`ByteStream`].
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Cap a byte stream at `limit` bytes.
///
/// The stream fails with [`StorageError::TooLarge`] as soon as the total
/// exceeds the limit, so an oversized body never reaches storage in full.
pub fn limit_stream(mut data: ByteStream, limit: u64) -> ByteStream {
    use futures::StreamExt;

    Box::pin(async_stream::try_stream! {
        let mut seen = 0u64;
        while let Some(bytes) = data.next().await {
            let bytes = bytes?;
            seen += bytes.len() as u64;
            if seen > limit {
                Err::<(), _>(StorageError::TooLarge { limit })?;
            }
            yield bytes;
        }
    })
}

/// Storage for raw chunk bytes addressed by `(token, chunk number)`.
///
/// The store has no notion of upload completeness; callers derive it from
/// [`ChunkStore::exists`].
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Check if a chunk is present without reading its content.
    async fn exists(&self, token: &UploadToken, chunk: ChunkNumber) -> StorageResult<bool>;

    /// Write a chunk from a byte stream and return the bytes written.
    ///
    /// The chunk becomes visible only once fully written. Concurrent writes
    /// of the same chunk are last-write-wins; a failed write leaves any
    /// previous version in place.
    async fn put_stream(
        &self,
        token: &UploadToken,
        chunk: ChunkNumber,
        data: ByteStream,
    ) -> StorageResult<u64>;

    /// Write a chunk from an in-memory buffer.
    async fn put(&self, token: &UploadToken, chunk: ChunkNumber, data: Bytes) -> StorageResult<u64> {
        self.put_stream(token, chunk, bytes_stream(data)).await
    }

    /// Get the filesystem location of a chunk.
    ///
    /// The path is returned whether or not the chunk exists.
    async fn chunk_location(&self, token: &UploadToken, chunk: ChunkNumber)
    -> StorageResult<PathBuf>;

    /// Delete every chunk of an upload. Deleting an unknown upload is not an error.
    async fn delete_upload(&self, token: &UploadToken) -> StorageResult<()>;

    /// Get the name of this storage backend, used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable before accepting requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
