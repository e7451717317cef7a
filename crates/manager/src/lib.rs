//! Upload manager for Quilt.
//!
//! This crate provides:
//! - Chunk admission and presence queries
//! - Completion detection derived from the chunk store
//! - Exactly-once finalize (per-token lock plus a conditional record update)
//! - Handler policies selecting destinations and completion results

pub mod error;
pub mod handler;
pub mod locks;
pub mod manager;

pub use error::{UploadError, UploadResult};
pub use handler::{DirectoryHandler, HandlerError, HandlerRegistry, UploadHandler};
pub use locks::{FinalizeGuard, FinalizeLocks};
pub use manager::{ManagerConfig, UploadManager};
