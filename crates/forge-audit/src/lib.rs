//! Hash-chained append-only job audit log.
//!
//! Progress delivery is advisory and lossy; this crate is the durable,
//! tamper-evident record of job state transitions. Each entry links to its
//! predecessor through `chain_hash = SHA-256(prev_hash || canonical_json)`,
//! with a 64-zero genesis hash per job.

pub mod canonical;
pub mod chain;
pub mod error;
pub mod service;
pub mod store;

pub use canonical::{canonical_json, canonical_timestamp};
pub use chain::{
    chain_hash, payloads, AuditEntry, AuditEventKind, GENESIS_HASH, MAX_PAYLOAD_BYTES,
};
pub use error::{AuditError, AuditResult};
pub use service::{ChainVerification, ChainViolation, JobAuditService, ViolationKind};
pub use store::{AuditStore, MemoryAuditStore, PostgresAuditStore};
