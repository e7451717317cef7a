//! Application state shared across handlers.

use quilt_core::config::AppConfig;
use quilt_manager::UploadManager;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload manager owning chunk, combine and record operations.
    pub manager: Arc<UploadManager>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: AppConfig, manager: UploadManager) -> Self {
        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
        }
    }
}
