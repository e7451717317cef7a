//! Upload record store for Quilt.
//!
//! One row per upload attempt, keyed by token. Chunk presence is never
//! recorded here; the chunk store is the source of truth for it.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::UploadRow;
pub use repos::UploadRepo;
pub use store::{MetadataStore, SqliteStore};

use quilt_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
