//! Progress pub/sub with an ordered per-job event cache.
//!
//! The broker is an in-process façade over Redis: channel publish/subscribe
//! for live delivery, a sorted set scored by `event_id` for reconnection
//! replay, and key TTLs for expiry. Event IDs are assigned by the reporter;
//! the broker only assigns one as a legacy fallback and never reorders.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use forge_models::{JobId, ProgressMessage};

use crate::error::BrokerResult;
use crate::metrics;
use crate::throttle::ThrottleGate;

/// Prefix for per-job progress channels: `job:progress:{job_id}`
const PROGRESS_CHANNEL_PREFIX: &str = "job:progress:";

/// Wildcard monitoring channel receiving every progress message.
pub const PROGRESS_ALL_CHANNEL: &str = "job:progress:*";

/// Prefix for per-job cached event streams: `job:progress:cache:{job_id}`
const PROGRESS_CACHE_PREFIX: &str = "job:progress:cache:";

/// Cached stream is trimmed to this many most-recent events.
pub const CACHE_MAX_EVENTS: usize = 1000;

/// Whole-stream TTL, refreshed on every admit (seconds).
pub const CACHE_TTL_SECS: u64 = 3600;

/// Bounded wait for a single subscription receive, so keepalive and
/// cancellation can be serviced promptly.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Get the channel name for a job.
pub fn channel_name(job_id: JobId) -> String {
    format!("{PROGRESS_CHANNEL_PREFIX}{job_id}")
}

/// Get the cache key for a job.
pub fn cache_key(job_id: JobId) -> String {
    format!("{PROGRESS_CACHE_PREFIX}{job_id}")
}

/// Outcome of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Admitted: cached, fanned out, TTL refreshed.
    Published { event_id: u64 },
    /// Dropped by the per-job cooldown.
    Throttled,
}

/// Broker for publishing/subscribing to progress events.
pub struct ProgressBroker {
    client: redis::Client,
    throttle: ThrottleGate,
    /// Highest event id seen per job; drives the legacy fallback counter
    /// and duplicate detection.
    last_event_ids: Mutex<HashMap<i64, u64>>,
}

impl ProgressBroker {
    /// Create a new broker.
    pub fn new(redis_url: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            throttle: ThrottleGate::default(),
            last_event_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> BrokerResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    /// Publish a progress message.
    ///
    /// Throttles non-milestone messages to one per job per 500 ms unless
    /// `force` is set. On admit the message is appended to the job's cached
    /// stream (scored by `event_id`), fanned out to the per-job channel and
    /// the wildcard monitoring channel, the cache is trimmed to the last
    /// 1000 events and its TTL refreshed.
    pub async fn publish(
        &self,
        job_id: JobId,
        mut msg: ProgressMessage,
        force: bool,
    ) -> BrokerResult<PublishOutcome> {
        msg.job_id = job_id;
        let mut msg = msg.derive();
        msg.validate()?;

        if !self.throttle.admit(job_id, msg.milestone, force) {
            debug!(%job_id, "progress publish throttled");
            metrics::record_throttled();
            return Ok(PublishOutcome::Throttled);
        }

        self.stamp_event_id(&mut msg);

        let payload = serde_json::to_string(&msg)?;
        let channel = channel_name(job_id);
        let cache = cache_key(job_id);

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::pipe()
            .publish(&channel, &payload)
            .ignore()
            .publish(PROGRESS_ALL_CHANNEL, &payload)
            .ignore()
            .zadd(&cache, &payload, msg.event_id as f64)
            .ignore()
            .zremrangebyrank(&cache, 0, -(CACHE_MAX_EVENTS as isize) - 1)
            .ignore()
            .expire(&cache, CACHE_TTL_SECS as i64)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        debug!(
            %job_id,
            event_id = msg.event_id,
            event_type = %msg.event_type,
            "published progress event"
        );
        metrics::record_publish(msg.event_type.as_str());

        if msg.is_terminal() {
            self.throttle.forget(job_id);
        }

        Ok(PublishOutcome::Published {
            event_id: msg.event_id,
        })
    }

    /// Assign a fallback id when the reporter left the message unstamped,
    /// and flag duplicate ids. The reporter is the authoritative writer;
    /// within a single reporter duplicates cannot occur.
    fn stamp_event_id(&self, msg: &mut ProgressMessage) {
        let mut ids = self
            .last_event_ids
            .lock()
            .expect("event id lock poisoned");
        let last = ids.entry(msg.job_id.as_i64()).or_insert(0);

        if msg.event_id == 0 {
            *last += 1;
            msg.event_id = *last;
            warn!(
                job_id = %msg.job_id,
                event_id = msg.event_id,
                "publisher did not assign event_id, using broker fallback"
            );
            metrics::record_fallback_event_id();
        } else if msg.event_id <= *last {
            warn!(
                job_id = %msg.job_id,
                event_id = msg.event_id,
                last_event_id = *last,
                "duplicate or out-of-order event_id, cache keeps the later write"
            );
            metrics::record_duplicate_event_id();
        } else {
            *last = msg.event_id;
        }
    }

    /// Subscribe to progress events for a job.
    ///
    /// The returned [`Subscription`] owns the pub/sub connection and
    /// releases it when dropped, so the broker resource is freed on every
    /// exit path.
    pub async fn subscribe(&self, job_id: JobId) -> BrokerResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = channel_name(job_id);

        pubsub.subscribe(&channel).await?;
        info!(%job_id, channel, "subscribed to progress channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match ProgressMessage::decode(payload.as_bytes()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("dropping undecodable progress message: {e}");
                    None
                }
            }
        });

        Ok(Subscription {
            job_id,
            stream: Box::pin(stream),
        })
    }

    /// Get cached messages with `event_id > since_event_id`, ascending.
    ///
    /// Best-effort: events evicted by the size bound or TTL are gone; the
    /// snapshot endpoint is the reconciliation path.
    pub async fn get_missed(
        &self,
        job_id: JobId,
        since_event_id: u64,
    ) -> BrokerResult<Vec<ProgressMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = cache_key(job_id);

        let raw: Vec<String> = conn
            .zrangebyscore(&key, (since_event_id + 1) as f64, "+inf")
            .await?;

        let events: Vec<ProgressMessage> = raw
            .iter()
            .filter_map(|s| ProgressMessage::decode(s.as_bytes()).ok())
            .collect();

        info!(
            %job_id,
            since_event_id,
            count = events.len(),
            "retrieved missed events from cache"
        );
        metrics::record_replay(events.len());

        Ok(events)
    }

    /// Get the most recent cached messages, newest first.
    pub async fn recent(&self, job_id: JobId, count: usize) -> BrokerResult<Vec<ProgressMessage>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = cache_key(job_id);

        let raw: Vec<String> = conn.zrevrange(&key, 0, count as isize - 1).await?;

        Ok(raw
            .iter()
            .filter_map(|s| ProgressMessage::decode(s.as_bytes()).ok())
            .collect())
    }

    /// Number of cached events for a job.
    pub async fn cached_count(&self, job_id: JobId) -> BrokerResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: u64 = conn.zcard(cache_key(job_id)).await?;
        Ok(count)
    }

    /// Drop the cached stream for a job.
    pub async fn clear_cache(&self, job_id: JobId) -> BrokerResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(cache_key(job_id)).await?;
        Ok(())
    }
}

/// Result of a bounded subscription receive.
#[derive(Debug)]
pub enum Recv {
    /// A progress message arrived.
    Message(ProgressMessage),
    /// Nothing within the bounded wait; service keepalive/cancellation.
    Idle,
    /// The underlying pub/sub connection ended.
    Closed,
}

/// A live subscription to one job's progress channel.
///
/// Dropping the subscription closes the pub/sub connection, which is the
/// release path for the broker resource (normal return, cancellation and
/// panic all run it).
pub struct Subscription {
    job_id: JobId,
    stream: Pin<Box<dyn Stream<Item = ProgressMessage> + Send>>,
}

impl Subscription {
    /// The job this subscription observes.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Receive with a 1-second bounded wait.
    pub async fn recv(&mut self) -> Recv {
        match tokio::time::timeout(RECV_TIMEOUT, self.stream.next()).await {
            Ok(Some(msg)) => Recv::Message(msg),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Idle,
        }
    }

    /// Explicitly release the subscription.
    pub fn close(self) {
        debug!(job_id = %self.job_id, "closing progress subscription");
    }
}
