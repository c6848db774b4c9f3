//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    ClientRateLimiter,
};
use crate::sse::{get_job_progress, stream_job_progress};
use crate::state::AppState;
use crate::ws::{get_connection_stats, ws_job_progress};

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let progress_routes = Router::new()
        .route("/jobs/:job_id/progress/stream", get(stream_job_progress))
        .route("/jobs/:job_id/progress", get(get_job_progress));

    // Rate-limited HTTP surface; rapid resubscription gets 429
    let rate_limiter = Arc::new(ClientRateLimiter::new(&state.config));
    let api_routes = Router::new()
        .nest("/api/v1", progress_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let ws_routes = Router::new()
        .route("/ws/jobs/:job_id/progress", get(ws_job_progress))
        .route("/ws/connections/stats", get(get_connection_stats));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
