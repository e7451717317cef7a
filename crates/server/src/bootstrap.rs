//! Building the upload manager from configuration.

use crate::state::AppState;
use anyhow::{Context, Result, bail};
use quilt_core::config::AppConfig;
use quilt_manager::{HandlerRegistry, ManagerConfig, UploadManager};

/// Validate the configuration and build every store the manager needs.
///
/// Fails before any request is accepted when the chunk root or database is
/// unusable or no upload handler is configured.
pub async fn build_manager(config: &AppConfig) -> Result<UploadManager> {
    if config.handlers.is_empty() {
        bail!("No upload handlers defined");
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let chunks = quilt_storage::from_config(&config.storage)
        .await
        .context("failed to initialize chunk store")?;
    // Verify storage before accepting requests so a bad mount fails at startup.
    chunks
        .health_check()
        .await
        .context("chunk store health check failed")?;
    tracing::info!(backend = chunks.backend_name(), root = %config.storage.chunk_root.display(), "Chunk store initialized");

    let metadata = quilt_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize upload record store")?;
    tracing::info!("Upload record store initialized");

    let combiner = quilt_storage::combiner_from_config(&config.combine);
    let handlers = HandlerRegistry::from_config(&config.handlers);
    tracing::info!(
        combiner = combiner.name(),
        handlers = ?handlers.names(),
        "Upload handlers registered"
    );

    Ok(UploadManager::new(
        chunks,
        combiner,
        metadata,
        handlers,
        ManagerConfig::from_app_config(config),
    ))
}

/// Build the full application state.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let manager = build_manager(&config).await?;
    Ok(AppState::new(config, manager))
}
