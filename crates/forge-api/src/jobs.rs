//! Job repository read contract.

use async_trait::async_trait;

use forge_broker::JobStatusStore;
use forge_models::{JobId, JobSnapshot};

use crate::error::ApiError;

/// Read-only job lookup used to gate subscriptions and serve snapshots.
#[async_trait]
pub trait JobDirectory: Send + Sync {
    async fn get_job(&self, job_id: JobId) -> Result<Option<JobSnapshot>, ApiError>;
}

/// Directory backed by the cached job snapshot store.
pub struct RedisJobDirectory {
    store: JobStatusStore,
}

impl RedisJobDirectory {
    pub fn new(store: JobStatusStore) -> Self {
        Self { store }
    }

    pub fn from_env() -> Result<Self, ApiError> {
        Ok(Self {
            store: JobStatusStore::from_env()?,
        })
    }
}

#[async_trait]
impl JobDirectory for RedisJobDirectory {
    async fn get_job(&self, job_id: JobId) -> Result<Option<JobSnapshot>, ApiError> {
        Ok(self.store.get(job_id).await?)
    }
}
