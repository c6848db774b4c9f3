//! API middleware.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::metrics;

/// Governor limiter for a single client.
type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct ClientEntry {
    limiter: IpRateLimiter,
    last_seen: Instant,
}

/// Per-client (IP-keyed) rate limiter table.
///
/// Same shape as the broker's throttle gate: one mutex over a flat map,
/// O(1) per request. Entries idle longer than `rate_limit_idle_secs` are
/// swept inline whenever the table would grow past `rate_limit_max_clients`,
/// so memory stays bounded without a background task. A table saturated by
/// active clients fails closed for new addresses.
pub struct ClientRateLimiter {
    clients: Mutex<HashMap<IpAddr, ClientEntry>>,
    quota: Quota,
    idle_ttl: Duration,
    max_clients: usize,
}

impl ClientRateLimiter {
    pub fn new(config: &ApiConfig) -> Self {
        let rps = NonZeroU32::new(config.rate_limit_rps).unwrap_or(NonZeroU32::MIN);
        Self {
            clients: Mutex::new(HashMap::new()),
            quota: Quota::per_second(rps),
            idle_ttl: Duration::from_secs(config.rate_limit_idle_secs),
            max_clients: config.rate_limit_max_clients,
        }
    }

    /// Whether a request from this address is admitted.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("limiter lock poisoned");

        if clients.len() >= self.max_clients && !clients.contains_key(&ip) {
            clients.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_ttl);
            if clients.len() >= self.max_clients {
                warn!(%ip, "rate limiter table saturated, rejecting new client");
                return false;
            }
        }

        let entry = clients.entry(ip).or_insert_with(|| ClientEntry {
            limiter: RateLimiter::direct(self.quota),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.limiter.check().is_ok()
    }

    /// Number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("limiter lock poisoned").len()
    }
}

/// Per-IP rate limiting; rapid resubscription gets 429.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<ClientRateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let path = request.uri().path().to_string();
    if !limiter.check(addr.ip()) {
        metrics::record_rate_limit_hit(&path);
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}

/// Create the CORS layer.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Standard security headers on every response.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static(
            "accelerometer=(), camera=(), geolocation=(), gyroscope=(), magnetometer=(), microphone=(), payment=(), usb=()",
        ),
    );
    headers.insert(
        "cross-origin-resource-policy",
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        "x-permitted-cross-domain-policies",
        HeaderValue::from_static("none"),
    );
    response
}

/// Attach a request ID to the request and response.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

/// Structured request logging.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: u32, max_clients: usize, idle_secs: u64) -> ClientRateLimiter {
        ClientRateLimiter::new(&ApiConfig {
            rate_limit_rps: rps,
            rate_limit_max_clients: max_clients,
            rate_limit_idle_secs: idle_secs,
            ..ApiConfig::default()
        })
    }

    #[test]
    fn test_rate_limiter_allows_then_blocks() {
        let limiter = limiter(1, 16, 900);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        // Second request in the same second exceeds 1 rps
        assert!(!limiter.check(ip));
    }

    #[test]
    fn test_rate_limiter_is_per_client() {
        let limiter = limiter(1, 16, 900);
        assert!(limiter.check("10.0.0.1".parse().unwrap()));
        assert!(limiter.check("10.0.0.2".parse().unwrap()));
        assert_eq!(limiter.client_count(), 2);
    }

    #[test]
    fn test_saturated_table_fails_closed_for_new_clients() {
        let limiter = limiter(10, 1, 900);
        assert!(limiter.check("10.0.0.1".parse().unwrap()));
        // Table is full of non-idle clients: a new address is rejected
        assert!(!limiter.check("10.0.0.2".parse().unwrap()));
        // The existing client is unaffected
        assert!(limiter.check("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_idle_clients_are_swept_at_capacity() {
        let limiter = limiter(10, 1, 0);
        assert!(limiter.check("10.0.0.1".parse().unwrap()));
        // idle_ttl of zero makes the first entry immediately sweepable
        assert!(limiter.check("10.0.0.2".parse().unwrap()));
        assert_eq!(limiter.client_count(), 1);
    }
}
