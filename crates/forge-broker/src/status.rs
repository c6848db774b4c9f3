//! Cached job snapshot store.
//!
//! Serves the read side of the job-repository contract: ownership checks
//! before a subscription is accepted and the polling snapshot endpoint.

use redis::AsyncCommands;

use forge_models::{JobId, JobSnapshot, JobStatus};

use crate::error::BrokerResult;

/// Prefix for job snapshot keys: `job:status:{job_id}`
const JOB_STATUS_PREFIX: &str = "job:status:";

/// Snapshot TTL (seconds).
pub const JOB_STATUS_TTL_SECS: u64 = 86_400;

fn status_key(job_id: JobId) -> String {
    format!("{JOB_STATUS_PREFIX}{job_id}")
}

/// Store for cached job snapshots.
#[derive(Clone)]
pub struct JobStatusStore {
    client: redis::Client,
}

impl JobStatusStore {
    pub fn new(redis_url: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn from_env() -> BrokerResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    /// Write a snapshot, refreshing its TTL.
    pub async fn put(&self, snapshot: &JobSnapshot) -> BrokerResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(snapshot)?;

        conn.set_ex::<_, _, ()>(status_key(snapshot.job_id), payload, JOB_STATUS_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Read a snapshot, if one is cached.
    pub async fn get(&self, job_id: JobId) -> BrokerResult<Option<JobSnapshot>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let value: Option<String> = conn.get(status_key(job_id)).await?;
        Ok(value.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Update progress and the current step on an existing snapshot.
    pub async fn set_progress(
        &self,
        job_id: JobId,
        progress: u8,
        current_step: Option<&str>,
    ) -> BrokerResult<()> {
        if let Some(mut snapshot) = self.get(job_id).await? {
            snapshot.set_progress(progress, current_step);
            self.put(&snapshot).await?;
        }
        Ok(())
    }

    /// Move an existing snapshot to a new status.
    pub async fn set_status(&self, job_id: JobId, status: JobStatus) -> BrokerResult<()> {
        if let Some(mut snapshot) = self.get(job_id).await? {
            snapshot.set_status(status);
            self.put(&snapshot).await?;
        }
        Ok(())
    }

    /// Mark the snapshot failed with an error message.
    pub async fn fail(&self, job_id: JobId, error: &str) -> BrokerResult<()> {
        if let Some(mut snapshot) = self.get(job_id).await? {
            snapshot.fail(error);
            self.put(&snapshot).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_key() {
        assert_eq!(status_key(JobId(11)), "job:status:11");
    }
}
