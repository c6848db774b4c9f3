//! The publish seam between the reporter and the broker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use forge_broker::{BrokerResult, ProgressBroker, PublishOutcome, TaskStateStore, PROGRESS_STATE};
use forge_models::ProgressMessage;

/// Destination for reporter-dispatched progress messages.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Publish a message; `force` bypasses broker throttling.
    async fn publish(&self, msg: ProgressMessage, force: bool) -> BrokerResult<PublishOutcome>;
}

/// Production sink: broker publish plus the task-runner state mirror.
pub struct BrokerSink {
    broker: Arc<ProgressBroker>,
    task_state: Option<TaskStateStore>,
    task_id: Option<String>,
}

impl BrokerSink {
    pub fn new(broker: Arc<ProgressBroker>) -> Self {
        Self {
            broker,
            task_state: None,
            task_id: None,
        }
    }

    /// Mirror every published message into the task runner's state record,
    /// so out-of-band pollers see the same cursor.
    pub fn with_task_mirror(mut self, task_state: TaskStateStore, task_id: impl Into<String>) -> Self {
        self.task_state = Some(task_state);
        self.task_id = Some(task_id.into());
        self
    }
}

#[async_trait]
impl ProgressSink for BrokerSink {
    async fn publish(&self, msg: ProgressMessage, force: bool) -> BrokerResult<PublishOutcome> {
        let job_id = msg.job_id;
        let outcome = self.broker.publish(job_id, msg.clone(), force).await?;

        if let PublishOutcome::Published { .. } = outcome {
            if let (Some(store), Some(task_id)) = (&self.task_state, &self.task_id) {
                let meta = serde_json::to_value(&msg)?;
                // Mirror failures do not undo the publish; the snapshot
                // endpoint reconciles.
                if let Err(e) = store.set_state(task_id, PROGRESS_STATE, meta).await {
                    warn!(%job_id, task_id, "task state mirror failed: {e}");
                }
            }
        }

        Ok(outcome)
    }
}
