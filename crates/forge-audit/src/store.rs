//! Audit entry storage.
//!
//! The append path is the only write path: lookup the latest entry for the
//! job, link the new entry to it, persist atomically. Entries are never
//! updated or deleted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use forge_models::JobId;

use crate::chain::{cap_payload, chain_hash, AuditEntry, AuditEventKind, GENESIS_HASH};
use crate::error::AuditResult;

/// Append-only audit storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an entry linked to the job's latest entry. The payload is
    /// capped, hashed, and stored with `prev_hash`/`chain_hash` embedded.
    async fn append(
        &self,
        job_id: JobId,
        kind: AuditEventKind,
        actor_id: Option<i64>,
        payload: Value,
    ) -> AuditResult<AuditEntry>;

    /// All entries for a job in insertion order.
    async fn entries(&self, job_id: JobId) -> AuditResult<Vec<AuditEntry>>;

    /// The latest entry for a job, if any.
    async fn latest(&self, job_id: JobId) -> AuditResult<Option<AuditEntry>>;
}

/// Link a payload into the chain: cap, hash, embed the hashes.
fn link_payload(
    prev_hash: &str,
    job_id: JobId,
    kind: AuditEventKind,
    payload: Value,
) -> (Value, String) {
    let mut payload = cap_payload(payload);
    let hash = chain_hash(prev_hash, job_id, kind, &payload);
    if let Value::Object(fields) = &mut payload {
        fields.insert("prev_hash".to_string(), Value::String(prev_hash.to_string()));
        fields.insert("chain_hash".to_string(), Value::String(hash.clone()));
    }
    (payload, hash)
}

/// PostgreSQL-backed audit store.
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect from a database URL.
    pub async fn connect(database_url: &str) -> AuditResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> AuditResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> AuditEntry {
        let kind: String = row.get("event_kind");
        AuditEntry {
            audit_id: row.get("id"),
            job_id: JobId(row.get("job_id")),
            event_kind: AuditEventKind::parse(&kind).unwrap_or(AuditEventKind::Progress),
            actor_id: row.get("actor_id"),
            payload: row.get("payload"),
            prev_hash: row.get::<String, _>("prev_hash").trim().to_string(),
            chain_hash: row.get::<String, _>("chain_hash").trim().to_string(),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn append(
        &self,
        job_id: JobId,
        kind: AuditEventKind,
        actor_id: Option<i64>,
        payload: Value,
    ) -> AuditResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;

        // Serialize appends per job: the row lock on the latest entry keeps
        // concurrent writers from linking to the same predecessor.
        let prev: Option<String> = sqlx::query(
            r#"
            SELECT chain_hash FROM job_audit_log
            WHERE job_id = $1
            ORDER BY id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(job_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get::<String, _>("chain_hash").trim().to_string());

        let prev_hash = prev.unwrap_or_else(|| GENESIS_HASH.to_string());
        let (payload, hash) = link_payload(&prev_hash, job_id, kind, payload);
        let created_at = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO job_audit_log (
                job_id, event_kind, actor_id, payload, prev_hash, chain_hash, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(job_id.as_i64())
        .bind(kind.as_str())
        .bind(actor_id)
        .bind(&payload)
        .bind(&prev_hash)
        .bind(&hash)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let audit_id: i64 = row.get("id");
        info!(
            %job_id,
            event_kind = %kind,
            audit_id,
            chain_hash = &hash[..8],
            "job audit entry appended"
        );

        Ok(AuditEntry {
            audit_id,
            job_id,
            event_kind: kind,
            actor_id,
            payload,
            prev_hash,
            chain_hash: hash,
            created_at,
        })
    }

    async fn entries(&self, job_id: JobId) -> AuditResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, event_kind, actor_id, payload, prev_hash, chain_hash, created_at
            FROM job_audit_log
            WHERE job_id = $1
            ORDER BY id
            "#,
        )
        .bind(job_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::entry_from_row).collect())
    }

    async fn latest(&self, job_id: JobId) -> AuditResult<Option<AuditEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, event_kind, actor_id, payload, prev_hash, chain_hash, created_at
            FROM job_audit_log
            WHERE job_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::entry_from_row))
    }
}

/// In-memory audit store for tests.
pub struct MemoryAuditStore {
    entries: Mutex<HashMap<i64, Vec<AuditEntry>>>,
    next_id: AtomicI64,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Mutate a stored entry in place. Test helper for tamper scenarios.
    pub fn tamper<F>(&self, job_id: JobId, index: usize, mutate: F)
    where
        F: FnOnce(&mut AuditEntry),
    {
        let mut entries = self.entries.lock().expect("audit lock poisoned");
        if let Some(list) = entries.get_mut(&job_id.as_i64()) {
            if let Some(entry) = list.get_mut(index) {
                mutate(entry);
            }
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(
        &self,
        job_id: JobId,
        kind: AuditEventKind,
        actor_id: Option<i64>,
        payload: Value,
    ) -> AuditResult<AuditEntry> {
        let mut entries = self.entries.lock().expect("audit lock poisoned");
        let list = entries.entry(job_id.as_i64()).or_default();

        let prev_hash = list
            .last()
            .map(|e| e.chain_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let (payload, hash) = link_payload(&prev_hash, job_id, kind, payload);

        let entry = AuditEntry {
            audit_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            job_id,
            event_kind: kind,
            actor_id,
            payload,
            prev_hash,
            chain_hash: hash,
            created_at: Utc::now(),
        };
        list.push(entry.clone());
        Ok(entry)
    }

    async fn entries(&self, job_id: JobId) -> AuditResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().expect("audit lock poisoned");
        Ok(entries.get(&job_id.as_i64()).cloned().unwrap_or_default())
    }

    async fn latest(&self, job_id: JobId) -> AuditResult<Option<AuditEntry>> {
        let entries = self.entries.lock().expect("audit lock poisoned");
        Ok(entries
            .get(&job_id.as_i64())
            .and_then(|list| list.last().cloned()))
    }
}
