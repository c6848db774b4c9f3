//! Worker configuration.

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis URL for the progress broker and state mirrors
    pub redis_url: String,
    /// Postgres URL for the audit chain (optional; lifecycle hooks need it)
    pub database_url: Option<String>,
    /// Stable identifier of this worker process
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            database_url: None,
            worker_id: format!("worker-{}", std::process::id()),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| format!("worker-{}", std::process::id())),
        }
    }
}
