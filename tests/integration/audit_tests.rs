//! Audit chain integration tests against Postgres.

use forge_audit::{JobAuditService, PostgresAuditStore};
use forge_models::JobId;
use serde_json::json;

async fn service() -> JobAuditService<PostgresAuditStore> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
    let store = PostgresAuditStore::connect(&url).await.expect("connect");
    store.migrate().await.expect("migrate");
    JobAuditService::new(store)
}

/// Full lifecycle append + verify against a real database.
#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_lifecycle_chain_roundtrip() {
    let svc = service().await;
    let job_id = JobId(chrono::Utc::now().timestamp_millis());

    svc.record_created(job_id, Some(1), "model_build", 5, json!({"mesh": "bracket"}), "idem-a")
        .await
        .expect("created");
    svc.record_queued(job_id, None, "jobs.default", "model_build")
        .await
        .expect("queued");
    svc.record_started(job_id, Some("worker-1"), Some("task-1"))
        .await
        .expect("started");
    svc.record_progress(job_id, 40, Some("solving constraints"))
        .await
        .expect("progress");
    svc.record_succeeded(job_id, Some(&json!({"exported": "bracket.step"})), Some(4200))
        .await
        .expect("succeeded");

    let report = svc.verify(job_id).await.expect("verify");
    assert!(report.valid, "violations: {:?}", report.violations);
    assert_eq!(report.entries_checked, 5);
}

/// The stored columns and the embedded payload hashes must agree.
#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_stored_entry_is_self_contained() {
    use forge_audit::AuditStore;

    let svc = service().await;
    let job_id = JobId(chrono::Utc::now().timestamp_millis() + 1);

    let entry = svc
        .record_failed(job_id, "E_OCCT", "boolean fuse failed", Some("trace line 1"))
        .await
        .expect("failed");

    let stored = svc.store().entries(job_id).await.expect("entries");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].chain_hash, entry.chain_hash);
    assert_eq!(stored[0].payload["chain_hash"], entry.chain_hash.as_str());
    assert_eq!(stored[0].payload["prev_hash"], forge_audit::GENESIS_HASH);
}
