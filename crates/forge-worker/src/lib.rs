//! Worker-side progress reporting.
//!
//! This crate provides:
//! - [`ProgressReporter`]: monotonic event IDs, operation contexts with
//!   guaranteed end events, domain-specific report helpers
//! - [`ProgressSink`]: the seam between the reporter and the broker, with a
//!   non-blocking dispatch channel so worker code never waits on broker I/O
//! - [`JobLifecycle`]: job state transition hooks that feed the audit chain
//!   synchronously and the progress fabric best-effort

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod reporter;
pub mod sink;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use lifecycle::JobLifecycle;
pub use logging::JobLogger;
pub use reporter::{OperationHandle, ProgressReporter, DISPATCH_BUFFER_SIZE};
pub use sink::{BrokerSink, ProgressSink};
