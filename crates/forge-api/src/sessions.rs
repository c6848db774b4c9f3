//! Connected session registry.
//!
//! Per-API-process bookkeeping of connected observers: one mutex over two
//! maps, O(1) register/remove. Cross-process fan-out happens through the
//! broker channels, so a process-local registry is sufficient.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use forge_models::JobId;

/// Transport a session is connected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    PushSocket,
    EventStream,
}

/// One connected observer of one job.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub job_id: JobId,
    pub user_id: i64,
    pub transport: TransportKind,
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(job_id: JobId, user_id: i64, transport: TransportKind) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            job_id,
            user_id,
            transport,
            connected_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, SessionInfo>,
    by_job: HashMap<i64, HashSet<Uuid>>,
}

/// Mutex-protected session registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under both indices.
    pub fn register(&self, info: SessionInfo) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner
            .by_job
            .entry(info.job_id.as_i64())
            .or_default()
            .insert(info.session_id);
        inner.sessions.insert(info.session_id, info);
    }

    /// Remove a session, cleaning both indices.
    pub fn remove(&self, session_id: Uuid) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if let Some(info) = inner.sessions.remove(&session_id) {
            let job_key = info.job_id.as_i64();
            if let Some(set) = inner.by_job.get_mut(&job_key) {
                set.remove(&session_id);
                if set.is_empty() {
                    inner.by_job.remove(&job_key);
                }
            }
        }
    }

    /// Total number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("session lock poisoned").sessions.len()
    }

    /// Number of sessions observing a job.
    pub fn job_subscriber_count(&self, job_id: JobId) -> usize {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .by_job
            .get(&job_id.as_i64())
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Per-job subscriber counts for the admin stats endpoint.
    pub fn job_subscriber_counts(&self) -> HashMap<i64, usize> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .by_job
            .iter()
            .map(|(job, set)| (*job, set.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let registry = SessionRegistry::new();
        let info = SessionInfo::new(JobId(5), 42, TransportKind::PushSocket);
        let session_id = info.session_id;

        registry.register(info);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.job_subscriber_count(JobId(5)), 1);

        registry.remove(session_id);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.job_subscriber_count(JobId(5)), 0);
        assert!(registry.job_subscriber_counts().is_empty());
    }

    #[test]
    fn test_multiple_sessions_per_job() {
        let registry = SessionRegistry::new();
        let a = SessionInfo::new(JobId(5), 1, TransportKind::PushSocket);
        let b = SessionInfo::new(JobId(5), 2, TransportKind::EventStream);
        let a_id = a.session_id;

        registry.register(a);
        registry.register(b);
        assert_eq!(registry.job_subscriber_count(JobId(5)), 2);

        registry.remove(a_id);
        assert_eq!(registry.job_subscriber_count(JobId(5)), 1);
    }

    #[test]
    fn test_remove_unknown_session_is_noop() {
        let registry = SessionRegistry::new();
        registry.remove(Uuid::new_v4());
        assert_eq!(registry.session_count(), 0);
    }
}
