//! Health check handler.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metadata: &'static str,
    pub storage: &'static str,
    pub chunk_store: &'static str,
}

fn component(ok: bool) -> &'static str {
    if ok { "ok" } else { "unavailable" }
}

/// GET /v1/health - Health check.
///
/// Unauthenticated so load balancers and orchestrators can probe it.
/// Returns 503 when any backing store fails its check; failure details
/// are logged, not returned.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (metadata, storage, chunks) = tokio::join!(
        state.metadata.health_check(),
        state.storage.health_check(),
        state.chunks.health_check(),
    );

    if let Err(e) = &metadata {
        tracing::warn!(error = %e, "Metadata health check failed");
    }
    if let Err(e) = &storage {
        tracing::warn!(error = %e, "Storage health check failed");
    }
    if let Err(e) = &chunks {
        tracing::warn!(error = %e, "Chunk store health check failed");
    }

    let healthy = metadata.is_ok() && storage.is_ok() && chunks.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            metadata: component(metadata.is_ok()),
            storage: component(storage.is_ok()),
            chunk_store: component(chunks.is_ok()),
        }),
    )
}
