//! Subscription filters and resumption cursors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::progress::{EventType, ProgressMessage, ValidationError};

/// Keepalive cadence on the SSE transport.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;
/// Retry hint attached to keepalive frames.
pub const KEEPALIVE_RETRY_MS: u64 = 1000;
/// Retry hint for transient stream errors.
pub const STREAM_ERROR_RETRY_MS: u64 = 5000;
/// Retry hint when the broker is unreachable.
pub const BROKER_UNAVAILABLE_RETRY_MS: u64 = 10_000;

/// Event filter applied identically to replayed and live messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionFilter {
    /// Accepted event types; `None` accepts all.
    pub filter_types: Option<Vec<EventType>>,
    /// Drop messages where `milestone == false`.
    #[serde(default)]
    pub milestones_only: bool,
}

impl SubscriptionFilter {
    /// Build from the transport query parameters.
    pub fn from_params(
        filter_types: Option<&str>,
        milestones_only: bool,
    ) -> Result<Self, ValidationError> {
        let filter_types = match filter_types {
            Some(raw) if !raw.trim().is_empty() => Some(EventType::parse_list(raw)?),
            _ => None,
        };
        Ok(Self {
            filter_types,
            milestones_only,
        })
    }

    /// Whether a message passes this filter.
    pub fn accepts(&self, msg: &ProgressMessage) -> bool {
        if self.milestones_only && !msg.milestone {
            return false;
        }
        match &self.filter_types {
            Some(types) => types.contains(&msg.event_type),
            None => true,
        }
    }
}

/// A client's subscription to one job's progress stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSubscription {
    /// Job to observe
    pub job_id: JobId,
    /// Highest event ID the client acknowledged; replay starts after it.
    pub last_event_id: Option<u64>,
    /// Event filter
    #[serde(default)]
    pub filter: SubscriptionFilter,
}
