//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "forge_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "forge_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "forge_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_SESSIONS_TOTAL: &str = "forge_ws_sessions_total";
    pub const WS_SESSIONS_ACTIVE: &str = "forge_ws_sessions_active";
    pub const WS_FRAMES_SENT: &str = "forge_ws_frames_sent_total";

    // SSE metrics
    pub const SSE_SESSIONS_TOTAL: &str = "forge_sse_sessions_total";
    pub const SSE_EVENTS_SENT: &str = "forge_sse_events_sent_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "forge_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket session opened.
pub fn record_ws_connection() {
    counter!(names::WS_SESSIONS_TOTAL).increment(1);
}

/// Update active WebSocket sessions gauge.
pub fn set_ws_active_sessions(count: i64) {
    gauge!(names::WS_SESSIONS_ACTIVE).set(count as f64);
}

/// Record a frame sent over a WebSocket session.
pub fn record_ws_frame_sent(frame: &str) {
    let labels = [("frame", frame.to_string())];
    counter!(names::WS_FRAMES_SENT, &labels).increment(1);
}

/// Record SSE session opened.
pub fn record_sse_connection() {
    counter!(names::SSE_SESSIONS_TOTAL).increment(1);
}

/// Record an event sent over an SSE session.
pub fn record_sse_event_sent(event: &str) {
    let labels = [("event", event.to_string())];
    counter!(names::SSE_EVENTS_SENT, &labels).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(path: &str) {
    let labels = [("path", sanitize_path(path))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (collapse numeric job IDs).
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();
    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/v1/jobs/42/progress/stream"),
            "/api/v1/jobs/:id/progress/stream"
        );
        assert_eq!(sanitize_path("/ws/jobs/7/progress"), "/ws/jobs/:id/progress");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
