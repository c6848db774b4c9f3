//! Per-job publish throttling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use forge_models::JobId;

/// Max one non-milestone publish per job per interval.
pub const THROTTLE_INTERVAL_MS: u64 = 500;

/// Process-local rate-smoothing gate keyed by job.
///
/// Best-effort by design: each API/worker process smooths its own publish
/// rate; this is not a global rate limit. Milestones and forced publishes
/// always pass and do not reset the window.
pub struct ThrottleGate {
    interval: Duration,
    last_publish: Mutex<HashMap<i64, Instant>>,
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(THROTTLE_INTERVAL_MS))
    }
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_publish: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a publish is admitted. Admitted non-milestone publishes open
    /// a new cooldown window for the job.
    pub fn admit(&self, job_id: JobId, milestone: bool, force: bool) -> bool {
        if force || milestone {
            return true;
        }

        let now = Instant::now();
        let mut last = self.last_publish.lock().expect("throttle lock poisoned");
        match last.get(&job_id.as_i64()) {
            Some(prev) if now.duration_since(*prev) < self.interval => false,
            _ => {
                last.insert(job_id.as_i64(), now);
                true
            }
        }
    }

    /// Drop the throttle window for a finished job.
    pub fn forget(&self, job_id: JobId) {
        self.last_publish
            .lock()
            .expect("throttle lock poisoned")
            .remove(&job_id.as_i64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_publish_admitted() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(7), false, false));
    }

    #[test]
    fn test_rapid_publishes_throttled() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(7), false, false));
        assert!(!gate.admit(JobId(7), false, false));
        assert!(!gate.admit(JobId(7), false, false));
    }

    #[test]
    fn test_milestone_bypasses_cooldown() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(9), false, false));
        assert!(gate.admit(JobId(9), true, false));
        assert!(gate.admit(JobId(9), true, false));
        assert!(gate.admit(JobId(9), true, false));
        // Non-milestone still inside the window
        assert!(!gate.admit(JobId(9), false, false));
    }

    #[test]
    fn test_force_bypasses_cooldown() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(1), false, false));
        assert!(gate.admit(JobId(1), false, true));
    }

    #[test]
    fn test_jobs_are_independent() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(1), false, false));
        assert!(gate.admit(JobId(2), false, false));
        assert!(!gate.admit(JobId(1), false, false));
    }

    #[test]
    fn test_window_reopens_after_interval() {
        let gate = ThrottleGate::new(Duration::from_millis(20));
        assert!(gate.admit(JobId(3), false, false));
        assert!(!gate.admit(JobId(3), false, false));
        std::thread::sleep(Duration::from_millis(30));
        assert!(gate.admit(JobId(3), false, false));
    }

    #[test]
    fn test_forget_clears_window() {
        let gate = ThrottleGate::default();
        assert!(gate.admit(JobId(4), false, false));
        gate.forget(JobId(4));
        assert!(gate.admit(JobId(4), false, false));
    }
}
