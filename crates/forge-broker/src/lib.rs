//! Redis-backed progress broker.
//!
//! This crate provides:
//! - Pub/sub fan-out of progress messages with per-job and wildcard channels
//! - A bounded, ordered per-job event cache for reconnection replay
//! - Publish throttling with milestone bypass
//! - The task-runner state mirror and the cached job snapshot store

pub mod broker;
pub mod error;
pub mod metrics;
pub mod status;
pub mod task_state;
pub mod throttle;

pub use broker::{
    cache_key, channel_name, ProgressBroker, PublishOutcome, Recv, Subscription,
    CACHE_MAX_EVENTS, CACHE_TTL_SECS, PROGRESS_ALL_CHANNEL, RECV_TIMEOUT,
};
pub use error::{BrokerError, BrokerResult};
pub use status::{JobStatusStore, JOB_STATUS_TTL_SECS};
pub use task_state::{TaskState, TaskStateStore, PROGRESS_STATE};
pub use throttle::{ThrottleGate, THROTTLE_INTERVAL_MS};
