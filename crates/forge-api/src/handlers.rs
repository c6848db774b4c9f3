//! Health and readiness handlers.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use forge_models::JobId;

use crate::error::ApiResult;
use crate::state::AppState;

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Readiness probe: verifies the broker round-trips.
pub async fn ready(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // Any cache read exercises the Redis connection.
    state.broker.cached_count(JobId(1)).await?;
    Ok(Json(json!({"status": "ready"})))
}
