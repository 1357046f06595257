//! Prometheus metrics for the stowage server.
//!
//! Counters cover the session lifecycle, promotion and the expiration
//! sweeper. None of them carry owner ids, file names or storage paths.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! It should only be reachable from the scraper's network.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session lifecycle
pub static SESSIONS_INITIATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_initiated_total",
        "Total number of upload sessions initiated",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_completed_total",
        "Total number of upload sessions promoted to attachments",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_failed_total",
        "Total number of promotions that moved a session to failed",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_CANCELLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_cancelled_total",
        "Total number of upload sessions cancelled",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_expired_total",
        "Total number of upload sessions expired by the sweeper",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_upload_sessions_resumed_total",
        "Total number of upload sessions resumed",
    )
    .expect("metric creation failed")
});

pub static PROGRESS_UPDATES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_progress_updates_total",
        "Total number of progress reports accepted",
    )
    .expect("metric creation failed")
});

// Promotion
pub static BYTES_PROMOTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_bytes_promoted_total",
        "Total bytes copied from the chunk store into permanent storage",
    )
    .expect("metric creation failed")
});

pub static OBJECTS_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_objects_deduplicated_total",
        "Promotions whose content already existed under the final key",
    )
    .expect("metric creation failed")
});

pub static PROMOTION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stowage_promotion_duration_seconds",
            "Time taken to complete an upload, including checksum and storage writes",
        )
        .buckets(vec![
            0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
        ]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stowage_upload_errors_total",
            "Total number of upload errors returned, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Sweeper
pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("stowage_sweep_runs_total", "Total number of sweeper runs")
        .expect("metric creation failed")
});

pub static SWEEP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_sweep_errors_total",
        "Per-item failures encountered by the sweeper",
    )
    .expect("metric creation failed")
});

pub static ORPHANED_CHUNKS_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stowage_orphaned_chunks_reclaimed_total",
        "Chunk store entries deleted because no live session owned them",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
/// Safe to call multiple times; registration only happens once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(SESSIONS_INITIATED.clone()),
            Box::new(SESSIONS_COMPLETED.clone()),
            Box::new(SESSIONS_FAILED.clone()),
            Box::new(SESSIONS_CANCELLED.clone()),
            Box::new(SESSIONS_EXPIRED.clone()),
            Box::new(SESSIONS_RESUMED.clone()),
            Box::new(PROGRESS_UPDATES.clone()),
            Box::new(BYTES_PROMOTED.clone()),
            Box::new(OBJECTS_DEDUPLICATED.clone()),
            Box::new(PROMOTION_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(SWEEP_ERRORS.clone()),
            Box::new(ORPHANED_CHUNKS_RECLAIMED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
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

/// Helper to record upload errors by kind.
pub fn record_upload_error(kind: &str) {
    UPLOAD_ERRORS.with_label_values(&[kind]).inc();
}
