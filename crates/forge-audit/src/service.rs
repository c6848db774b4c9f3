//! Job audit service: typed transition records and chain verification.

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use forge_models::JobId;

use crate::chain::{chain_hash, payloads, AuditEntry, AuditEventKind, GENESIS_HASH};
use crate::error::AuditResult;
use crate::store::AuditStore;

/// Verification report for one job's chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub job_id: JobId,
    pub entries_checked: usize,
    pub violations: Vec<ChainViolation>,
}

/// A single detected chain violation.
#[derive(Debug, Clone, Serialize)]
pub struct ChainViolation {
    pub audit_id: i64,
    pub position: usize,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PrevHashMismatch,
    ChainHashMismatch,
}

/// Audit service for job state transitions.
///
/// Callers must treat an append failure as "transition not finalized":
/// the error propagates and the caller retries or escalates.
pub struct JobAuditService<S> {
    store: S,
}

impl<S: AuditStore> JobAuditService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn record_created(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        job_type: &str,
        priority: i32,
        params: Value,
        idempotency_key: &str,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Created,
            actor_id,
            payloads::created(job_type, priority, params, idempotency_key),
        )
        .await
    }

    pub async fn record_queued(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        queue_name: &str,
        routing_key: &str,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Queued,
            actor_id,
            payloads::queued(queue_name, routing_key),
        )
        .await
    }

    pub async fn record_started(
        &self,
        job_id: JobId,
        worker_id: Option<&str>,
        task_id: Option<&str>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Started,
            None,
            payloads::started(worker_id, task_id),
        )
        .await
    }

    pub async fn record_progress(
        &self,
        job_id: JobId,
        progress: u8,
        message: Option<&str>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Progress,
            None,
            payloads::progress(progress, message),
        )
        .await
    }

    pub async fn record_retrying(
        &self,
        job_id: JobId,
        retry_count: u32,
        error_code: Option<&str>,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Retrying,
            None,
            payloads::retrying(retry_count, error_code, error_message, next_retry_at),
        )
        .await
    }

    pub async fn record_cancelled(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        reason: Option<&str>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Cancelled,
            actor_id,
            payloads::cancelled(reason, actor_id),
        )
        .await
    }

    pub async fn record_failed(
        &self,
        job_id: JobId,
        error_code: &str,
        error_message: &str,
        traceback: Option<&str>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Failed,
            None,
            payloads::failed(error_code, error_message, traceback),
        )
        .await
    }

    pub async fn record_succeeded(
        &self,
        job_id: JobId,
        output: Option<&Value>,
        duration_ms: Option<u64>,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::Succeeded,
            None,
            payloads::succeeded(output, duration_ms),
        )
        .await
    }

    pub async fn record_dlq_replayed(
        &self,
        job_id: JobId,
        actor_id: Option<i64>,
        dlq_name: &str,
        original_error: Option<&str>,
        replay_attempt: u32,
    ) -> AuditResult<AuditEntry> {
        self.append(
            job_id,
            AuditEventKind::DlqReplayed,
            actor_id,
            payloads::dlq_replayed(dlq_name, original_error, replay_attempt, actor_id),
        )
        .await
    }

    async fn append(
        &self,
        job_id: JobId,
        kind: AuditEventKind,
        actor_id: Option<i64>,
        payload: Value,
    ) -> AuditResult<AuditEntry> {
        match self.store.append(job_id, kind, actor_id, payload).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                error!(%job_id, event_kind = %kind, error = %e, "job audit append failed");
                Err(e)
            }
        }
    }

    /// Re-derive every link in insertion order and flag mismatches.
    ///
    /// The expected `prev_hash` is carried forward from the *recomputed*
    /// hash, so a tampered entry invalidates itself and every later entry.
    pub async fn verify(&self, job_id: JobId) -> AuditResult<ChainVerification> {
        let entries = self.store.entries(job_id).await?;
        let entries_checked = entries.len();
        let mut violations = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();

        for (position, entry) in entries.iter().enumerate() {
            if entry.prev_hash != expected_prev {
                violations.push(ChainViolation {
                    audit_id: entry.audit_id,
                    position,
                    kind: ViolationKind::PrevHashMismatch,
                    expected: expected_prev.clone(),
                    actual: entry.prev_hash.clone(),
                });
            }

            // The embedded hashes were added after hashing; strip them
            // before recomputing.
            let mut clean = entry.payload.clone();
            if let Value::Object(fields) = &mut clean {
                fields.remove("chain_hash");
                fields.remove("prev_hash");
            }
            let recomputed = chain_hash(&expected_prev, job_id, entry.event_kind, &clean);

            if entry.chain_hash != recomputed {
                violations.push(ChainViolation {
                    audit_id: entry.audit_id,
                    position,
                    kind: ViolationKind::ChainHashMismatch,
                    expected: recomputed.clone(),
                    actual: entry.chain_hash.clone(),
                });
            }

            expected_prev = recomputed;
        }

        let report = ChainVerification {
            valid: violations.is_empty(),
            job_id,
            entries_checked,
            violations,
        };
        info!(
            %job_id,
            entries_checked,
            valid = report.valid,
            violations = report.violations.len(),
            "job audit chain verified"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAuditStore;
    use serde_json::json;
    use sha2::{Digest, Sha256};

    fn service() -> JobAuditService<MemoryAuditStore> {
        JobAuditService::new(MemoryAuditStore::new())
    }

    #[tokio::test]
    async fn test_first_entry_hashes_from_genesis() {
        let svc = service();
        let entry = svc
            .record_created(JobId(100), Some(1), "model_build", 5, json!({"x": 1}), "idem-1")
            .await
            .unwrap();

        // chain_hash = SHA-256("0"*64 || canonical_json(P1))
        let mut clean = entry.payload.clone();
        clean.as_object_mut().unwrap().remove("chain_hash");
        clean.as_object_mut().unwrap().remove("prev_hash");
        let canonical = crate::canonical::canonical_json(&json!({
            "job_id": 100,
            "event_type": "created",
            "created_at": clean["created_at"],
            "job_type": clean["job_type"],
            "priority": clean["priority"],
            "params": clean["params"],
            "idempotency_key": clean["idempotency_key"],
            "metadata": clean["metadata"],
        }));
        let mut hasher = Sha256::new();
        hasher.update(GENESIS_HASH.as_bytes());
        hasher.update(canonical.as_bytes());
        assert_eq!(entry.chain_hash, hex::encode(hasher.finalize()));
    }

    #[tokio::test]
    async fn test_second_entry_links_to_first() {
        let svc = service();
        let first = svc
            .record_created(JobId(100), None, "model_build", 5, json!({}), "idem-1")
            .await
            .unwrap();
        let second = svc
            .record_started(JobId(100), Some("worker-1"), Some("task-abc"))
            .await
            .unwrap();

        assert_eq!(second.prev_hash, first.chain_hash);

        let mut clean = second.payload.clone();
        clean.as_object_mut().unwrap().remove("chain_hash");
        clean.as_object_mut().unwrap().remove("prev_hash");
        let recomputed = chain_hash(&first.chain_hash, JobId(100), AuditEventKind::Started, &clean);
        assert_eq!(second.chain_hash, recomputed);
    }

    #[tokio::test]
    async fn test_full_lifecycle_chain_is_valid() {
        let svc = service();
        let job = JobId(200);
        svc.record_created(job, Some(1), "model_build", 5, json!({"p": 1}), "k")
            .await
            .unwrap();
        svc.record_queued(job, None, "jobs.default", "model_build")
            .await
            .unwrap();
        svc.record_started(job, Some("w1"), Some("t1")).await.unwrap();
        svc.record_progress(job, 50, Some("halfway")).await.unwrap();
        svc.record_retrying(job, 1, Some("E_TRANSIENT"), Some("redis gone"), None)
            .await
            .unwrap();
        svc.record_succeeded(job, Some(&json!({"shapes": 3})), Some(2000))
            .await
            .unwrap();

        let report = svc.verify(job).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 6);
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_entry_cascades() {
        let svc = service();
        let job = JobId(300);
        svc.record_created(job, None, "model_build", 5, json!({}), "k")
            .await
            .unwrap();
        svc.record_started(job, None, None).await.unwrap();
        svc.record_succeeded(job, None, Some(10)).await.unwrap();

        // Mutate a stored field in the first entry.
        svc.store().tamper(job, 0, |entry| {
            entry.payload["priority"] = json!(99);
        });

        let report = svc.verify(job).await.unwrap();
        assert!(!report.valid);
        // Entry #1 fails its own hash, and by transitivity every later
        // entry fails at least its prev-hash link.
        assert!(report
            .violations
            .iter()
            .any(|v| v.position == 0 && v.kind == ViolationKind::ChainHashMismatch));
        for position in 1..3 {
            assert!(
                report.violations.iter().any(|v| v.position == position),
                "expected violation at position {position}"
            );
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_valid() {
        let svc = service();
        let report = svc.verify(JobId(404)).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
    }

    #[tokio::test]
    async fn test_verify_rehash_of_stored_payload_matches() {
        // Audit canonicality: re-serializing a stored payload with the
        // canonical algorithm and re-hashing yields the original chain_hash.
        let svc = service();
        let job = JobId(500);
        svc.record_failed(job, "E_OCCT", "fuse failed", Some("trace"))
            .await
            .unwrap();

        let entry = &svc.store().entries(job).await.unwrap()[0];
        let mut clean = entry.payload.clone();
        clean.as_object_mut().unwrap().remove("chain_hash");
        clean.as_object_mut().unwrap().remove("prev_hash");

        let reparsed: Value =
            serde_json::from_str(&crate::canonical::canonical_json(&clean)).unwrap();
        let rehashed = chain_hash(GENESIS_HASH, job, AuditEventKind::Failed, &reparsed);
        assert_eq!(rehashed, entry.chain_hash);
    }
}
