//! Server test utilities.

use quilt_core::config::AppConfig;
use quilt_server::bootstrap::build_state;
use quilt_server::{AppState, create_router};
use std::path::PathBuf;
use tempfile::TempDir;

/// Chunk size used by every test server.
#[allow(dead_code)]
pub const TEST_CHUNK_SIZE: u64 = 1024;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        config.server.chunk_size = TEST_CHUNK_SIZE;
        modifier(&mut config);

        quilt_server::metrics::register_metrics();
        let state = build_state(config)
            .await
            .expect("Failed to build application state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Directory the `default` handler writes combined files to.
    pub fn files_dir(&self) -> PathBuf {
        self._temp_dir.path().join("files")
    }

    /// Root directory for chunk files.
    pub fn chunk_root(&self) -> PathBuf {
        self.state.config.storage.chunk_root.clone()
    }
}
