//! Hash-chain primitives and typed event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use forge_models::JobId;

use crate::canonical::{canonical_json, canonical_timestamp};

/// Genesis `prev_hash` for the first entry of every job.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Payloads larger than this (canonical bytes) are replaced by a stub.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024;

/// Characters of the original payload kept in a truncation stub.
const PAYLOAD_PREVIEW_CHARS: usize = 500;

/// Tracebacks are clipped to this many characters before storage.
const TRACEBACK_MAX_CHARS: usize = 5000;

/// Job state transition kinds recorded in the audit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Created,
    Queued,
    Started,
    Progress,
    Retrying,
    Cancelled,
    Failed,
    Succeeded,
    DlqReplayed,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Created => "created",
            AuditEventKind::Queued => "queued",
            AuditEventKind::Started => "started",
            AuditEventKind::Progress => "progress",
            AuditEventKind::Retrying => "retrying",
            AuditEventKind::Cancelled => "cancelled",
            AuditEventKind::Failed => "failed",
            AuditEventKind::Succeeded => "succeeded",
            AuditEventKind::DlqReplayed => "dlq_replayed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.to_string())).ok()
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored audit entry.
///
/// `prev_hash` and `chain_hash` live both in dedicated columns and inside
/// the payload, so an exported payload is verifiable on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: i64,
    pub job_id: JobId,
    pub event_kind: AuditEventKind,
    pub actor_id: Option<i64>,
    pub payload: Value,
    pub prev_hash: String,
    pub chain_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Compute the chain hash for an entry:
/// `SHA-256(prev_hash_hex_ascii || canonical_json({job_id, event_type, ...payload}))`.
///
/// The payload passed here must not contain the `prev_hash`/`chain_hash`
/// keys; those are embedded after hashing.
pub fn chain_hash(prev_hash: &str, job_id: JobId, kind: AuditEventKind, payload: &Value) -> String {
    let mut canonical_payload = serde_json::Map::new();
    canonical_payload.insert("job_id".to_string(), json!(job_id.as_i64()));
    canonical_payload.insert("event_type".to_string(), json!(kind.as_str()));
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            canonical_payload.insert(key.clone(), value.clone());
        }
    }

    let canonical = canonical_json(&Value::Object(canonical_payload));

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Replace an oversized payload with a summary stub.
pub fn cap_payload(payload: Value) -> Value {
    let canonical = canonical_json(&payload);
    if canonical.len() <= MAX_PAYLOAD_BYTES {
        return payload;
    }
    let preview: String = canonical.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
    json!({
        "truncated": true,
        "original_size": canonical.len(),
        "preview": preview,
    })
}

/// Typed payload constructors with the minimal required keys per kind.
///
/// Every payload carries a `metadata` object (empty by default) so
/// canonical hashes stay stable across producers.
pub mod payloads {
    use super::*;

    pub fn created(job_type: &str, priority: i32, params: Value, idempotency_key: &str) -> Value {
        json!({
            "created_at": canonical_timestamp(Utc::now()),
            "job_type": job_type,
            "priority": priority,
            "params": params,
            "idempotency_key": idempotency_key,
            "metadata": {},
        })
    }

    pub fn queued(queue_name: &str, routing_key: &str) -> Value {
        json!({
            "queue_name": queue_name,
            "routing_key": routing_key,
            "queued_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn started(worker_id: Option<&str>, task_id: Option<&str>) -> Value {
        json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "started_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn progress(progress: u8, message: Option<&str>) -> Value {
        json!({
            "progress": progress.min(100),
            "message": message,
            "updated_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn retrying(
        retry_count: u32,
        error_code: Option<&str>,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Value {
        json!({
            "retry_count": retry_count,
            "error_code": error_code,
            "error_message": error_message,
            "next_retry_at": next_retry_at.map(canonical_timestamp),
            "retried_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn cancelled(reason: Option<&str>, actor_id: Option<i64>) -> Value {
        json!({
            "reason": reason,
            "cancelled_at": canonical_timestamp(Utc::now()),
            "cancelled_by": if actor_id.is_some() { "user" } else { "system" },
            "metadata": {},
        })
    }

    pub fn failed(error_code: &str, error_message: &str, traceback: Option<&str>) -> Value {
        let traceback: Option<String> =
            traceback.map(|tb| tb.chars().take(TRACEBACK_MAX_CHARS).collect());
        json!({
            "error_code": error_code,
            "error_message": error_message,
            "traceback": traceback,
            "failed_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn succeeded(output: Option<&Value>, duration_ms: Option<u64>) -> Value {
        json!({
            "output_summary": summarize_output(output),
            "duration_ms": duration_ms,
            "completed_at": canonical_timestamp(Utc::now()),
            "metadata": {},
        })
    }

    pub fn dlq_replayed(
        dlq_name: &str,
        original_error: Option<&str>,
        replay_attempt: u32,
        actor_id: Option<i64>,
    ) -> Value {
        json!({
            "dlq_name": dlq_name,
            "original_error": original_error,
            "replay_attempt": replay_attempt,
            "replayed_at": canonical_timestamp(Utc::now()),
            "replayed_by": if actor_id.is_some() { "user" } else { "system" },
            "metadata": {},
        })
    }

    /// Summarize job output for audit storage: small outputs inline, large
    /// ones reduced to their keys and size.
    fn summarize_output(output: Option<&Value>) -> Value {
        let Some(output) = output else {
            return json!({"empty": true});
        };
        let size = canonical_json(output).len();
        let keys: Vec<&str> = match output {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        if size < 1000 {
            json!({"keys": keys, "size": size, "data": output})
        } else {
            json!({"keys": keys, "size": size, "truncated": true})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_hash_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_chain_hash_matches_manual_computation() {
        let payload = json!({"progress": 50, "message": "halfway"});
        let got = chain_hash(GENESIS_HASH, JobId(100), AuditEventKind::Progress, &payload);

        let canonical = canonical_json(&json!({
            "event_type": "progress",
            "job_id": 100,
            "message": "halfway",
            "progress": 50,
        }));
        let mut hasher = Sha256::new();
        hasher.update(GENESIS_HASH.as_bytes());
        hasher.update(canonical.as_bytes());
        assert_eq!(got, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_chain_hash_changes_with_payload() {
        let a = chain_hash(GENESIS_HASH, JobId(1), AuditEventKind::Progress, &json!({"p": 1}));
        let b = chain_hash(GENESIS_HASH, JobId(1), AuditEventKind::Progress, &json!({"p": 2}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_chain_hash_changes_with_prev() {
        let payload = json!({"p": 1});
        let first = chain_hash(GENESIS_HASH, JobId(1), AuditEventKind::Progress, &payload);
        let second = chain_hash(&first, JobId(1), AuditEventKind::Progress, &payload);
        assert_ne!(first, second);
    }

    #[test]
    fn test_cap_payload_passthrough() {
        let payload = json!({"small": true});
        assert_eq!(cap_payload(payload.clone()), payload);
    }

    #[test]
    fn test_cap_payload_truncates_oversized() {
        let blob = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let capped = cap_payload(json!({"blob": blob}));
        assert_eq!(capped["truncated"], true);
        assert!(capped["original_size"].as_u64().unwrap() > MAX_PAYLOAD_BYTES as u64);
        assert_eq!(capped["preview"].as_str().unwrap().chars().count(), 500);
    }

    #[test]
    fn test_failed_payload_clips_traceback() {
        let tb = "line\n".repeat(2000);
        let payload = payloads::failed("E_SOLVE", "solver diverged", Some(&tb));
        assert_eq!(
            payload["traceback"].as_str().unwrap().chars().count(),
            5000
        );
        assert_eq!(payload["error_code"], "E_SOLVE");
    }

    #[test]
    fn test_required_payload_keys() {
        let p = payloads::created("model_build", 5, json!({"x": 1}), "idem-1");
        for key in ["created_at", "job_type", "priority", "params", "idempotency_key"] {
            assert!(p.get(key).is_some(), "missing {key}");
        }

        let p = payloads::dlq_replayed("jobs.dlq", Some("boom"), 2, Some(9));
        assert_eq!(p["replayed_by"], "user");
        let p = payloads::dlq_replayed("jobs.dlq", None, 1, None);
        assert_eq!(p["replayed_by"], "system");

        let p = payloads::cancelled(Some("user requested"), Some(3));
        assert_eq!(p["cancelled_by"], "user");
    }

    #[test]
    fn test_succeeded_inlines_small_output() {
        let output = json!({"shapes": 12});
        let p = payloads::succeeded(Some(&output), Some(1500));
        assert_eq!(p["output_summary"]["data"]["shapes"], 12);

        let big = json!({"log": "y".repeat(2000)});
        let p = payloads::succeeded(Some(&big), None);
        assert_eq!(p["output_summary"]["truncated"], true);

        let p = payloads::succeeded(None, None);
        assert_eq!(p["output_summary"]["empty"], true);
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(AuditEventKind::parse("dlq_replayed"), Some(AuditEventKind::DlqReplayed));
        assert_eq!(AuditEventKind::parse("nonsense"), None);
    }
}
