//! Job lifecycle hooks.
//!
//! Every state transition is appended to the audit chain first —
//! synchronously, and a failed append propagates so the transition is not
//! treated as finalized. The matching `status_change` progress message and
//! the job snapshot update are best-effort: lost progress is tolerable,
//! lost audit is not.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use forge_audit::{AuditStore, JobAuditService};
use forge_broker::{JobStatusStore, ProgressBroker};
use forge_models::{EventType, JobId, JobSnapshot, JobStatus, ProgressMessage};

use crate::error::WorkerResult;
use crate::reporter::ProgressReporter;

/// Lifecycle event source for the audit chain and the progress fabric.
pub struct JobLifecycle<S> {
    audit: JobAuditService<S>,
    broker: Arc<ProgressBroker>,
    status: JobStatusStore,
    worker_id: String,
}

impl<S: AuditStore> JobLifecycle<S> {
    pub fn new(
        audit: JobAuditService<S>,
        broker: Arc<ProgressBroker>,
        status: JobStatusStore,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            audit,
            broker,
            status,
            worker_id: worker_id.into(),
        }
    }

    pub fn audit(&self) -> &JobAuditService<S> {
        &self.audit
    }

    /// Record job creation (submission side, before any reporter exists).
    #[allow(clippy::too_many_arguments)]
    pub async fn created(
        &self,
        job_id: JobId,
        owner_id: i64,
        actor_id: Option<i64>,
        job_type: &str,
        priority: i32,
        params: Value,
        idempotency_key: &str,
    ) -> WorkerResult<()> {
        self.audit
            .record_created(job_id, actor_id, job_type, priority, params, idempotency_key)
            .await?;

        let snapshot = JobSnapshot::new(job_id, owner_id);
        if let Err(e) = self.status.put(&snapshot).await {
            warn!(%job_id, "job snapshot write failed: {e}");
        }
        Ok(())
    }

    /// Record the hand-off to the queue.
    pub async fn queued(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        queue_name: &str,
        routing_key: &str,
    ) -> WorkerResult<()> {
        self.audit
            .record_queued(job_id, actor_id, queue_name, routing_key)
            .await?;
        self.publish_status(job_id, JobStatus::Queued, Some("queued")).await;
        Ok(())
    }

    /// Record execution start; emits the running status through the
    /// reporter so the event stays on the reporter's ID sequence.
    pub async fn started(
        &self,
        reporter: &ProgressReporter,
        task_id: Option<&str>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit
            .record_started(job_id, Some(&self.worker_id), task_id)
            .await?;

        if let Err(e) = self.status.set_status(job_id, JobStatus::Running).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report_status(JobStatus::Running, Some("started"));
        Ok(())
    }

    /// Record a coarse progress checkpoint in the durable chain.
    pub async fn progress(
        &self,
        reporter: &ProgressReporter,
        progress: u8,
        message: Option<&str>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit.record_progress(job_id, progress, message).await?;

        if let Err(e) = self.status.set_progress(job_id, progress, message).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report(progress, message.unwrap_or("progress"), false);
        Ok(())
    }

    /// Record a retry.
    pub async fn retrying(
        &self,
        reporter: &ProgressReporter,
        retry_count: u32,
        error_code: Option<&str>,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit
            .record_retrying(job_id, retry_count, error_code, error_message, next_retry_at)
            .await?;

        if let Err(e) = self.status.set_status(job_id, JobStatus::Queued).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report_status(
            JobStatus::Queued,
            Some(&format!("retrying (attempt {retry_count})")),
        );
        Ok(())
    }

    /// Record cancellation.
    pub async fn cancelled(
        &self,
        reporter: &ProgressReporter,
        actor_id: Option<i64>,
        reason: Option<&str>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit.record_cancelled(job_id, actor_id, reason).await?;

        if let Err(e) = self.status.set_status(job_id, JobStatus::Cancelled).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report_status(JobStatus::Cancelled, reason);
        Ok(())
    }

    /// Record failure.
    pub async fn failed(
        &self,
        reporter: &ProgressReporter,
        error_code: &str,
        error_message: &str,
        traceback: Option<&str>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit
            .record_failed(job_id, error_code, error_message, traceback)
            .await?;

        if let Err(e) = self.status.fail(job_id, error_message).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report_status(JobStatus::Failed, Some(error_message));
        Ok(())
    }

    /// Record success.
    pub async fn succeeded(
        &self,
        reporter: &ProgressReporter,
        output: Option<&Value>,
        duration_ms: Option<u64>,
    ) -> WorkerResult<()> {
        let job_id = reporter.job_id();
        self.audit.record_succeeded(job_id, output, duration_ms).await?;

        if let Err(e) = self.status.set_status(job_id, JobStatus::Completed).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
        reporter.report_status(JobStatus::Completed, Some("completed"));
        Ok(())
    }

    /// Record a replay out of the dead-letter queue (submission side).
    pub async fn dlq_replayed(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        dlq_name: &str,
        original_error: Option<&str>,
        replay_attempt: u32,
    ) -> WorkerResult<()> {
        self.audit
            .record_dlq_replayed(job_id, actor_id, dlq_name, original_error, replay_attempt)
            .await?;
        self.publish_status(job_id, JobStatus::Queued, Some("replayed from DLQ"))
            .await;
        Ok(())
    }

    /// Publish a status change without a reporter (submission side); the
    /// broker assigns a fallback event ID.
    async fn publish_status(&self, job_id: JobId, status: JobStatus, message: Option<&str>) {
        let mut msg = ProgressMessage::new(job_id, EventType::StatusChange);
        msg.status = Some(status);
        msg.message = message.map(str::to_string);

        if let Err(e) = self.broker.publish(job_id, msg, true).await {
            warn!(%job_id, "status publish failed: {e}");
        }
        if let Err(e) = self.status.set_status(job_id, status).await {
            warn!(%job_id, "job snapshot update failed: {e}");
        }
    }
}
