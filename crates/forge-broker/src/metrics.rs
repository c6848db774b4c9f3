//! Broker-side metrics.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const EVENTS_PUBLISHED_TOTAL: &str = "forge_broker_events_published_total";
    pub const EVENTS_THROTTLED_TOTAL: &str = "forge_broker_events_throttled_total";
    pub const FALLBACK_EVENT_IDS_TOTAL: &str = "forge_broker_fallback_event_ids_total";
    pub const DUPLICATE_EVENT_IDS_TOTAL: &str = "forge_broker_duplicate_event_ids_total";
    pub const REPLAY_EVENTS_TOTAL: &str = "forge_broker_replay_events_total";
}

/// Record an admitted publish.
pub fn record_publish(event_type: &str) {
    let labels = [("type", event_type.to_string())];
    counter!(names::EVENTS_PUBLISHED_TOTAL, &labels).increment(1);
}

/// Record a throttled publish.
pub fn record_throttled() {
    counter!(names::EVENTS_THROTTLED_TOTAL).increment(1);
}

/// Record a legacy fallback event-id assignment by the broker.
pub fn record_fallback_event_id() {
    counter!(names::FALLBACK_EVENT_IDS_TOTAL).increment(1);
}

/// Record a duplicate or out-of-order event id observed at publish time.
pub fn record_duplicate_event_id() {
    counter!(names::DUPLICATE_EVENT_IDS_TOTAL).increment(1);
}

/// Record replayed events served from the cache.
pub fn record_replay(count: usize) {
    counter!(names::REPLAY_EVENTS_TOTAL).increment(count as u64);
}
