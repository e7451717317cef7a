//! HTTP transport for Quilt resumable uploads.
//!
//! This crate provides:
//! - Upload initiation, chunk check and chunk upload endpoints
//! - Upload completion and status endpoints
//! - Health and Prometheus metrics endpoints
//! - Startup wiring from configuration

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
