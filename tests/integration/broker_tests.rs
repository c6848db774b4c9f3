//! Broker integration tests.

use std::time::Duration;

use forge_broker::{ProgressBroker, PublishOutcome, Recv};
use forge_models::{EventType, JobId, JobStatus, Phase, ProgressMessage};

fn msg(job_id: JobId, event_id: u64, event_type: EventType) -> ProgressMessage {
    let mut m = ProgressMessage::new(job_id, event_type);
    m.event_id = event_id;
    m
}

/// Test publish, cache append and replay ordering.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_and_replay() {
    dotenvy::dotenv().ok();

    let broker = ProgressBroker::from_env().expect("Failed to create broker");
    let job_id = JobId(910_011);
    broker.clear_cache(job_id).await.expect("Failed to clear cache");

    for event_id in 1..=5 {
        let mut m = msg(job_id, event_id, EventType::Phase);
        m.phase = Some(Phase::Start); // milestone: bypasses throttle
        let outcome = broker.publish(job_id, m, false).await.expect("publish");
        assert_eq!(outcome, PublishOutcome::Published { event_id });
    }

    // Resume from cursor 3: exactly 4 and 5, ascending
    let missed = broker.get_missed(job_id, 3).await.expect("get_missed");
    let ids: Vec<u64> = missed.iter().map(|m| m.event_id).collect();
    assert_eq!(ids, vec![4, 5]);

    // Snapshot fallback: newest first
    let recent = broker.recent(job_id, 2).await.expect("recent");
    let ids: Vec<u64> = recent.iter().map(|m| m.event_id).collect();
    assert_eq!(ids, vec![5, 4]);

    broker.clear_cache(job_id).await.ok();
}

/// Test that non-milestone publishes inside the cooldown are throttled.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_throttle_drops_rapid_updates() {
    dotenvy::dotenv().ok();

    let broker = ProgressBroker::from_env().expect("Failed to create broker");
    let job_id = JobId(910_007);
    broker.clear_cache(job_id).await.ok();

    let mut published = 0;
    for event_id in 1..=10 {
        let outcome = broker
            .publish(job_id, msg(job_id, event_id, EventType::ProgressUpdate), false)
            .await
            .expect("publish");
        if matches!(outcome, PublishOutcome::Published { .. }) {
            published += 1;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // 10 updates 100ms apart over a 500ms window: at least 1, at most 3
    assert!((1..=3).contains(&published), "published {published}");

    broker.clear_cache(job_id).await.ok();
}

/// Test that milestones always pass the throttle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_milestone_bypass() {
    dotenvy::dotenv().ok();

    let broker = ProgressBroker::from_env().expect("Failed to create broker");
    let job_id = JobId(910_009);
    broker.clear_cache(job_id).await.ok();

    for event_id in 1..=3 {
        let mut m = msg(job_id, event_id, EventType::Phase);
        m.phase = Some(Phase::Start);
        let outcome = broker.publish(job_id, m, false).await.expect("publish");
        assert!(matches!(outcome, PublishOutcome::Published { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(broker.cached_count(job_id).await.expect("count"), 3);
    broker.clear_cache(job_id).await.ok();
}

/// Test live delivery through a subscription, including terminal drain.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_subscribe_live_delivery() {
    dotenvy::dotenv().ok();

    let broker = ProgressBroker::from_env().expect("Failed to create broker");
    let job_id = JobId(910_042);
    broker.clear_cache(job_id).await.ok();

    let mut subscription = broker.subscribe(job_id).await.expect("subscribe");

    let mut terminal = msg(job_id, 1, EventType::StatusChange);
    terminal.status = Some(JobStatus::Completed);
    broker.publish(job_id, terminal, true).await.expect("publish");

    loop {
        match subscription.recv().await {
            Recv::Message(m) => {
                assert!(m.is_terminal());
                break;
            }
            Recv::Idle => continue,
            Recv::Closed => panic!("subscription closed before delivery"),
        }
    }

    broker.clear_cache(job_id).await.ok();
}
