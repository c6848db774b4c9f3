//! Axum HTTP/WS API server for job progress streaming.
//!
//! This crate provides:
//! - WebSocket and SSE transports over the progress broker
//! - Credential verification and per-job authorization
//! - Reconnection replay via `Last-Event-ID`
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod sessions;
pub mod sse;
pub mod state;
pub mod ws;

pub use auth::{AuthSubject, CredentialVerifier, JwtVerifier, Role};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use jobs::{JobDirectory, RedisJobDirectory};
pub use routes::create_router;
pub use sessions::{SessionInfo, SessionRegistry, TransportKind};
pub use state::AppState;
