//! Multi-candidate election tests.
//!
//! Every test runs under paused tokio time with all candidates sharing one
//! anchored clock, so lease arithmetic is exact and the tests run instantly.

use std::time::Duration;
use tokio::time::sleep;

use elector_core::Version;
use elector_engine::ElectionConfig;
use elector_testing::{init_test_logging, ElectionEvent, ElectionHarness};

const LEASE_MILLIS: u64 = 15_000;
const RENEW_DEADLINE_MILLIS: u64 = 10_000;
/// Retry period plus the largest jitter
const MAX_RETRY_MILLIS: u64 = 2_200;
/// Slack for the harness polling interval
const SLACK_MILLIS: u64 = 100;

fn config() -> ElectionConfig {
    ElectionConfig::default().with_randomization_seed(11)
}

#[tokio::test(start_paused = true)]
async fn test_first_candidate_creates_record_second_is_refused() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    assert_eq!(
        harness.wait_for_leader(Duration::from_secs(1)).await,
        Some("A".to_string())
    );

    let record = harness.record().await.unwrap();
    assert_eq!(record.version, Version::INITIAL);
    assert_eq!(record.record.holder_id, "A");

    harness.spawn("B").unwrap();
    sleep(Duration::from_millis(100)).await;

    let b = harness.candidate("B");
    assert!(!b.is_leader());
    assert_eq!(b.observed_leaders(), vec!["A".to_string()]);
    assert_eq!(b.handle().stats().acquire_attempts, 1);

    // Next attempt comes one jittered retry period later
    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(harness.candidate("B").handle().stats().acquire_attempts, 1);
    sleep(Duration::from_millis(1_200)).await;
    assert_eq!(harness.candidate("B").handle().stats().acquire_attempts, 2);

    // The same holder is reported once
    assert_eq!(
        harness.candidate("B").observed_leaders(),
        vec!["A".to_string()]
    );
    assert_eq!(harness.leaders(), vec!["A".to_string()]);

    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backend_outage_loses_leadership_then_other_candidate_claims() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    harness.spawn("B").unwrap();

    // Past A's first renewal
    sleep(Duration::from_secs(3)).await;
    let last_renew = harness.record().await.unwrap().record.renew_time;
    assert!(harness.candidate("A").handle().stats().renewals >= 1);

    harness.candidate("A").backend().set_unreachable(true);
    sleep(Duration::from_secs(11)).await;

    let a = harness.candidate("A");
    assert!(!a.is_leader());
    let a_stopped = a.first(&ElectionEvent::StoppedLeading).unwrap();
    let budget_used = a_stopped - last_renew;
    assert!(
        (RENEW_DEADLINE_MILLIS..=RENEW_DEADLINE_MILLIS + SLACK_MILLIS).contains(&budget_used),
        "A stepped down {}ms after its last renewal",
        budget_used
    );
    assert_eq!(a.observer().get_leader(), "");
    assert_eq!(a.handle().stats().leadership_losses, 1);

    // B waits for the lease to expire, not just for A to step down
    assert!(!harness.candidate("B").is_leader());
    assert_eq!(
        harness.wait_for_leader(Duration::from_secs(10)).await,
        Some("B".to_string())
    );
    let b_started = harness
        .candidate("B")
        .first(&ElectionEvent::StartedLeading)
        .unwrap();
    assert!(b_started >= last_renew + LEASE_MILLIS);
    assert!(b_started <= last_renew + LEASE_MILLIS + MAX_RETRY_MILLIS + SLACK_MILLIS);

    let record = harness.record().await.unwrap();
    assert_eq!(record.record.holder_id, "B");
    assert_eq!(record.record.leader_transitions, 1);

    // Once reachable again, A follows B
    harness.candidate("A").backend().heal();
    sleep(Duration::from_secs(3)).await;
    let a = harness.candidate("A");
    assert!(!a.is_leader());
    assert_eq!(a.observer().get_leader(), "B");
    assert_eq!(a.observed_leaders(), vec!["A".to_string(), "B".to_string()]);

    assert!(harness.overlapping_terms().is_empty());
    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_converges_after_leader_crash() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    harness.spawn("B").unwrap();
    harness.spawn("C").unwrap();

    sleep(Duration::from_secs(4)).await;
    let last_renew = harness.record().await.unwrap().record.renew_time;
    harness.candidate_mut("A").crash();

    let successor = harness
        .wait_for_leader(Duration::from_secs(30))
        .await
        .unwrap();
    assert_ne!(successor, "A");

    let started = harness
        .candidate(&successor)
        .first(&ElectionEvent::StartedLeading)
        .unwrap();
    assert!(started >= last_renew + LEASE_MILLIS);
    assert!(started <= last_renew + LEASE_MILLIS + MAX_RETRY_MILLIS + SLACK_MILLIS);

    // The other follower learns about the successor on its next attempt
    sleep(Duration::from_secs(3)).await;
    let follower = if successor == "B" { "C" } else { "B" };
    assert_eq!(
        harness.candidate(follower).observer().get_leader(),
        successor
    );
    assert_eq!(harness.leaders(), vec![successor]);
    assert!(harness.overlapping_terms().is_empty());

    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_release_on_cancel_hands_over_within_retry_period() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    harness.spawn("B").unwrap();
    sleep(Duration::from_secs(1)).await;

    harness.candidate_mut("A").stop().await.unwrap();
    let stopped_at = harness.now_millis();

    let record = harness.record().await.unwrap();
    assert!(!record.record.is_held());
    assert_eq!(harness.candidate("A").handle().stats().releases, 1);
    assert!(harness
        .candidate("A")
        .first(&ElectionEvent::StoppedLeading)
        .is_some());

    assert_eq!(
        harness.wait_for_leader(Duration::from_secs(5)).await,
        Some("B".to_string())
    );
    let b_started = harness
        .candidate("B")
        .first(&ElectionEvent::StartedLeading)
        .unwrap();
    assert!(b_started - stopped_at <= MAX_RETRY_MILLIS + SLACK_MILLIS);

    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_without_release_lease_lapses_on_expiry() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness
        .spawn_with("A", config().with_release_on_cancel(false))
        .unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    harness.spawn("B").unwrap();
    sleep(Duration::from_secs(3)).await;

    harness.candidate_mut("A").stop().await.unwrap();
    let record = harness.record().await.unwrap();
    assert!(record.record.is_held_by("A"));
    let last_renew = record.record.renew_time;
    assert_eq!(harness.candidate("A").handle().stats().releases, 0);

    assert_eq!(
        harness.wait_for_leader(Duration::from_secs(20)).await,
        Some("B".to_string())
    );
    let b_started = harness
        .candidate("B")
        .first(&ElectionEvent::StartedLeading)
        .unwrap();
    assert!(b_started >= last_renew + LEASE_MILLIS);

    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_renewals_keep_holder_and_acquire_time() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    let first = harness.record().await.unwrap();

    let mut previous = first.clone();
    for _ in 0..12 {
        sleep(Duration::from_millis(2_500)).await;
        let current = harness.record().await.unwrap();

        assert_eq!(current.record.holder_id, "A");
        assert_eq!(current.record.acquire_time, first.record.acquire_time);
        assert_eq!(current.record.leader_transitions, 0);
        assert!(current.version > previous.version);
        assert!(current.record.renew_time > previous.record.renew_time);
        previous = current;
    }

    assert_eq!(harness.candidate("A").terms().len(), 1);
    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_observers_follow_callbacks() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    harness.spawn("B").unwrap();

    for _ in 0..60 {
        sleep(Duration::from_millis(500)).await;
        assert_eq!(harness.candidate("A").observer().get_leader(), "A");
        assert_eq!(harness.candidate("B").observer().get_leader(), "A");
    }

    harness.candidate_mut("A").stop().await.unwrap();
    assert_eq!(harness.candidate("A").observer().get_leader(), "");

    harness.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    assert_eq!(harness.candidate("B").observer().get_leader(), "B");

    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flaky_backend_never_yields_two_leaders() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    for id in ["A", "B", "C"] {
        let candidate = harness.spawn(id).unwrap();
        candidate.backend().set_failure_rate(0.3);
        candidate.backend().set_latency(Duration::from_millis(40));
    }

    for _ in 0..480 {
        sleep(Duration::from_millis(250)).await;
        let leaders = harness.leaders();
        assert!(leaders.len() <= 1, "multiple leaders: {:?}", leaders);

        if let (Some(leader), Some(record)) = (leaders.first(), harness.record().await) {
            assert_eq!(&record.record.holder_id, leader);
        }
    }

    assert!(harness.overlapping_terms().is_empty());
    harness.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hung_release_is_abandoned_after_grace() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    harness.spawn("A").unwrap();
    harness.wait_for_leader(Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // Every call from A now hangs far past the release grace
    harness
        .candidate("A")
        .backend()
        .set_latency(Duration::from_secs(60));

    let stop_started = harness.now_millis();
    harness.candidate_mut("A").stop().await.unwrap();
    let took = harness.now_millis() - stop_started;

    let grace = config().release_grace.as_millis() as u64;
    assert!(
        (grace..=grace + SLACK_MILLIS).contains(&took),
        "run returned {}ms after cancel",
        took
    );

    let a = harness.candidate("A");
    assert_eq!(a.handle().stats().releases, 0);
    assert!(a.first(&ElectionEvent::StoppedLeading).is_some());
    assert!(harness.record().await.unwrap().record.is_held_by("A"));
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_start_reports_race_winner() {
    init_test_logging();
    let mut harness = ElectionHarness::new("scheduler", config());

    // Equal latency makes both candidates read the absent record before
    // either creates it, so one create loses with a conflict
    for id in ["A", "B"] {
        let candidate = harness.spawn(id).unwrap();
        candidate.backend().set_latency(Duration::from_millis(10));
    }

    let winner = harness
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();
    let loser = if winner == "A" { "B" } else { "A" };
    sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.leaders(), vec![winner.clone()]);
    let loser = harness.candidate(loser);
    assert_eq!(loser.handle().stats().acquire_attempts, 1);
    assert_eq!(loser.observed_leaders().last(), Some(&winner));
    assert_eq!(loser.observer().get_leader(), winner);

    let record = harness.record().await.unwrap();
    assert_eq!(record.version, Version::INITIAL);
    assert_eq!(record.record.holder_id, winner);

    harness.shutdown().await.unwrap();
}
