//! Liveness endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Check that the chunk store and record store respond.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.manager.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
