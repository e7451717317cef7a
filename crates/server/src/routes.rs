//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/upload/init", post(handlers::init_upload))
        // Chunk presence check and chunk upload share the path, as resumable clients expect.
        .route(
            "/upload",
            get(handlers::check_chunk).post(handlers::upload_chunk),
        )
        .route("/upload/complete", post(handlers::complete_upload))
        .route("/upload/status", get(handlers::upload_status));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(upload_routes);

    // Conditionally add metrics endpoint based on config.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
