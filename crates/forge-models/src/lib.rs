//! Shared data models for the ForgeCAD progress fabric.
//!
//! This crate provides Serde-serializable types for:
//! - Progress message schema v2 (event taxonomy, validation, derivation)
//! - Job identity, status and the cached job snapshot
//! - Stream envelopes for the WebSocket and SSE transports
//! - Subscription filters and resumption cursors

pub mod envelope;
pub mod job;
pub mod progress;
pub mod subscription;

// Re-export common types
pub use envelope::{ControlFrame, StreamFrame};
pub use job::{JobId, JobSnapshot, JobStatus};
pub use progress::{
    Assembly4Phase, DocumentPhase, EventType, ExportFormat, MaterialPhase, OcctOperation,
    OperationGroup, Phase, ProgressMessage, TopologyPhase, ValidationError, SCHEMA_VERSION,
};
pub use subscription::{ProgressSubscription, SubscriptionFilter};
