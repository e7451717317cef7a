//! Chunk storage and file combining for Quilt.
//!
//! This crate provides:
//! - Chunk storage keyed by `(token, chunk number)` with atomic writes
//! - File combiners that concatenate chunks into a final file atomically

pub mod backends;
pub mod combiner;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemChunkStore;
pub use combiner::{CatCombiner, CombineRequest, FileCombiner, StreamingCombiner};
pub use error::{CombineError, CombineResult, StorageError, StorageResult};
pub use traits::{ByteStream, ChunkStore, bytes_stream, limit_stream};

use quilt_core::config::{CombineConfig, StorageConfig};
use std::sync::Arc;

/// Create a chunk store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ChunkStore>> {
    if config.chunk_root.as_os_str().is_empty() {
        return Err(StorageError::Config("chunk_root must not be empty".to_string()));
    }
    let store = FilesystemChunkStore::new(&config.chunk_root).await?;
    Ok(Arc::new(store))
}

/// Create the file combiner selected by configuration.
pub fn combiner_from_config(config: &CombineConfig) -> Arc<dyn FileCombiner> {
    combiner::from_strategy(config.strategy)
}
