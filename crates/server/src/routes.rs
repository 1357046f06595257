//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Session lifecycle
        .route(
            "/v1/uploads",
            post(handlers::initiate_upload).get(handlers::list_uploads),
        )
        .route("/v1/uploads/{session_guid}", get(handlers::get_upload))
        .route(
            "/v1/uploads/{session_guid}/complete",
            post(handlers::complete_upload),
        )
        .route(
            "/v1/uploads/{session_guid}/cancel",
            post(handlers::cancel_upload),
        )
        .route(
            "/v1/uploads/{session_guid}/pause",
            post(handlers::pause_upload),
        )
        .route(
            "/v1/uploads/{session_guid}/resume",
            post(handlers::resume_upload),
        )
        // Progress callbacks keyed by chunk upload handle
        .route(
            "/v1/progress/{chunk_upload_id}",
            get(handlers::get_progress).put(handlers::update_progress),
        );

    let mut router = Router::new().merge(api_routes);

    // When enabled, /metrics must be network-restricted to the scraper.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
