//! Prometheus metrics for the Quilt server.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no tokens or file names, only aggregate counts, but the
//! endpoint should still be network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload lifecycle metrics
pub static UPLOADS_INITIATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quilt_uploads_initiated_total",
        "Total number of uploads initiated",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quilt_uploads_completed_total",
        "Total number of uploads finalized",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("quilt_chunks_uploaded_total", "Total number of chunks stored")
        .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("quilt_bytes_uploaded_total", "Total chunk bytes stored")
        .expect("metric creation failed")
});

// Timing metrics
pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "quilt_finalize_duration_seconds",
            "Time taken to combine and finalize an upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0]),
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "quilt_chunk_upload_duration_seconds",
            "Time taken to store a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "quilt_upload_errors_total",
            "Total upload errors by error code",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Current state gauges
pub static FINALIZES_IN_PROGRESS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "quilt_finalizes_in_progress",
        "Current number of finalize calls in flight",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_INITIATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FINALIZE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FINALIZES_IN_PROGRESS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Keeps a gauge incremented until dropped, so cancelled requests still
/// decrement it.
pub struct GaugeGuard {
    gauge: IntGauge,
}

impl GaugeGuard {
    pub fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
