use kindsync::core::config::{HealthConfig, RetryConfig, SyncConfig};
use kindsync::core::error::TransportError;
use kindsync::core::schemas;
use kindsync::core::store::Store;
use kindsync::core::time::{DAY_MS, ManualClock};
use kindsync::plugins::compliance::{Admission, ComplianceGate, RawEvent};
use kindsync::plugins::health::{HealthInputs, HealthStatus, compute_health, report};
use kindsync::plugins::network::{BatteryLevel, NetworkQuality, NetworkState, SyncStrategy};
use kindsync::plugins::planner::BatchPlanner;
use kindsync::plugins::retry::RetryScheduler;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000_000;

fn enqueue(store: &Store, category: &str, n: usize) {
    let gate = ComplianceGate::new(SyncConfig::default().gate, Arc::new(ManualClock::new(NOW)));
    for i in 0..n {
        let raw = RawEvent {
            session_id: "01HZX3V7K2M4N5P6Q7R8S9T0VW".to_string(),
            category: category.to_string(),
            indicators: json!({"score": i as i64}).as_object().cloned().unwrap(),
            timestamp: None,
        };
        let Admission::Admitted(record) = gate.admit(&raw) else {
            panic!("fixture event must be admitted");
        };
        store.enqueue(&record).expect("enqueue");
    }
}

fn wifi() -> NetworkState {
    NetworkState {
        connected: true,
        quality: NetworkQuality::High,
        metered: false,
        battery: BatteryLevel::High,
        observed_at: NOW,
    }
}

#[test]
fn empty_store_is_healthy() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let health = report(&store, &HealthConfig::default(), NOW).unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.pending_events, 0);
    assert!(health.recommendations.is_empty());
}

#[test]
fn report_counts_queue_and_batch_states() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    enqueue(&store, "empathy", 3);
    enqueue(&store, "engagement", 2);

    let planner = BatchPlanner::new(SyncConfig::default().batching, RetryConfig::default());
    let batches = planner
        .plan(&store, SyncStrategy::Aggressive, &wifi(), NOW)
        .unwrap();
    assert_eq!(batches.len(), 2);
    enqueue(&store, "empathy", 1);

    // One batch in flight, one failed with budget left.
    store.begin_transmission(&batches[0].batch_id, NOW).unwrap();
    let scheduler = RetryScheduler::new(RetryConfig::default());
    let in_flight = store.begin_transmission(&batches[1].batch_id, NOW).unwrap();
    let outcome = scheduler.outcome_for_failure(
        &in_flight,
        &TransportError::Transient("timeout".to_string()),
        NOW,
    );
    store.fail_batch(&batches[1].batch_id, outcome).unwrap();

    let health = report(&store, &HealthConfig::default(), NOW).unwrap();
    assert_eq!(health.pending_batches, 1);
    assert_eq!(health.failed_batches, 1);
    assert_eq!(health.pending_events, 6);
    assert_eq!(health.status, HealthStatus::Concerning);
    assert!(!health.recommendations.is_empty());
}

#[test]
fn configured_thresholds_drive_backlog() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    enqueue(&store, "app_usage", 12);

    let config = SyncConfig::from_toml(
        "[health]\nconcerning_pending_events = 5\nbacklog_pending_events = 10\n",
    )
    .expect("parse config");
    let health = report(&store, &config.health, NOW).unwrap();
    assert_eq!(health.status, HealthStatus::Backlog);
    assert!(
        health
            .recommendations
            .iter()
            .any(|r| r.contains("backlog"))
    );
}

#[test]
fn recorded_cycle_error_marks_unhealthy_until_cleared() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    store
        .meta_set(schemas::META_LAST_CYCLE_ERROR, "storage")
        .unwrap();
    assert_eq!(
        report(&store, &HealthConfig::default(), NOW).unwrap().status,
        HealthStatus::Unhealthy
    );

    store.meta_set(schemas::META_LAST_CYCLE_ERROR, "").unwrap();
    assert_eq!(
        report(&store, &HealthConfig::default(), NOW).unwrap().status,
        HealthStatus::Healthy
    );
}

#[test]
fn stale_sync_is_only_flagged_with_pending_events() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    store
        .meta_set(schemas::META_LAST_SYNC_AT, &NOW.to_string())
        .unwrap();
    let later = NOW + 8 * DAY_MS;

    let idle = report(&store, &HealthConfig::default(), later).unwrap();
    assert!(idle.recommendations.is_empty());

    enqueue(&store, "leadership", 1);
    let waiting = report(&store, &HealthConfig::default(), later).unwrap();
    assert_eq!(waiting.status, HealthStatus::Healthy);
    assert_eq!(waiting.recommendations.len(), 1);
}

#[test]
fn many_failed_batches_are_unhealthy() {
    let inputs = HealthInputs {
        failed_retryable_batches: 10,
        pending_events: 5_000,
        ..Default::default()
    };
    let health = compute_health(&inputs, &HealthConfig::default(), NOW);
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.status.to_string(), "unhealthy");
}

#[test]
fn permanently_rejected_batch_is_reported_but_not_concerning() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    enqueue(&store, "empathy", 2);

    let planner = BatchPlanner::new(SyncConfig::default().batching, RetryConfig::default());
    let batches = planner
        .plan(&store, SyncStrategy::Aggressive, &wifi(), NOW)
        .unwrap();
    let scheduler = RetryScheduler::new(RetryConfig::default());
    let in_flight = store.begin_transmission(&batches[0].batch_id, NOW).unwrap();
    let outcome = scheduler.outcome_for_failure(&in_flight, &TransportError::from_status(422), NOW);
    store.fail_batch(&batches[0].batch_id, outcome).unwrap();

    let health = report(&store, &HealthConfig::default(), NOW).unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.failed_batches, 1);
    assert_eq!(health.terminal_batches, 1);
    assert!(
        health
            .recommendations
            .iter()
            .all(|r| !r.contains("retried automatically"))
    );
    assert!(health.recommendations.iter().any(|r| r.contains("will not be retried")));
}
