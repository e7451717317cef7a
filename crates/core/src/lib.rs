//! Core domain types for resumable chunked uploads.
//!
//! This crate defines the data model shared by every other crate:
//! - Upload tokens and chunk numbering
//! - Upload records and their lifecycle
//! - Transport request/response bodies
//! - Configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod token;
pub mod upload;

pub use chunk::{ChunkNumber, chunk_count};
pub use config::{CombineMode, CombineStrategy};
pub use error::{Error, Result};
pub use token::{TOKEN_LENGTH, UploadToken};
pub use upload::{InitUpload, UploadRecord, UploadState};

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Maximum chunk size: 64 MiB
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum chunk size: 1 KiB
pub const MIN_CHUNK_SIZE: u64 = 1024;
