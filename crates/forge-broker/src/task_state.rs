//! Task-runner state mirror.
//!
//! Every published progress message is also reflected into the task
//! runner's own state record, so out-of-band pollers that only know the
//! runner's task id see the same cursor as streaming clients.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::BrokerResult;

/// Prefix for task state keys: `task:state:{task_id}`
const TASK_STATE_PREFIX: &str = "task:state:";

/// Task state TTL (seconds).
const TASK_STATE_TTL_SECS: u64 = 86_400;

/// State label used while a task is reporting progress.
pub const PROGRESS_STATE: &str = "PROGRESS";

fn state_key(task_id: &str) -> String {
    format!("{TASK_STATE_PREFIX}{task_id}")
}

/// A mirrored task state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Runner state label, e.g. `PROGRESS`
    pub state: String,
    /// Latest progress message as JSON meta
    pub meta: serde_json::Value,
    /// When the mirror was written
    pub updated_at: DateTime<Utc>,
}

/// Store mirroring task-runner state into Redis.
#[derive(Clone)]
pub struct TaskStateStore {
    client: redis::Client,
}

impl TaskStateStore {
    pub fn new(redis_url: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn from_env() -> BrokerResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    /// Mirror a state and meta payload for a task.
    pub async fn set_state(
        &self,
        task_id: &str,
        state: &str,
        meta: serde_json::Value,
    ) -> BrokerResult<()> {
        let record = TaskState {
            state: state.to_string(),
            meta,
            updated_at: Utc::now(),
        };
        let payload = serde_json::to_string(&record)?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(state_key(task_id), payload, TASK_STATE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Read the mirrored state for a task.
    pub async fn get_state(&self, task_id: &str) -> BrokerResult<Option<TaskState>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let value: Option<String> = conn.get(state_key(task_id)).await?;
        Ok(value.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Drop the mirrored state when a task finishes.
    pub async fn clear(&self, task_id: &str) -> BrokerResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(state_key(task_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key() {
        assert_eq!(state_key("abc-123"), "task:state:abc-123");
    }

    #[test]
    fn test_task_state_roundtrip() {
        let record = TaskState {
            state: PROGRESS_STATE.to_string(),
            meta: serde_json::json!({"progress_pct": 40}),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, "PROGRESS");
        assert_eq!(back.meta["progress_pct"], 40);
    }
}
