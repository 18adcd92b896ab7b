use kindsync::core::broker::AUDIT_LOG_NAME;
use kindsync::core::config::SyncConfig;
use kindsync::core::error::SyncError;
use kindsync::core::model::{AnalyticsRecord, BatchStatus, BatchType, SyncBatch, SyncState};
use kindsync::core::store::{FailureOutcome, Store};
use kindsync::core::time::{DAY_MS, ManualClock};
use kindsync::plugins::compliance::{Admission, ComplianceGate, RawEvent};
use serde_json::json;
use std::fs;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;

const SESSION: &str = "01HZX3V7K2M4N5P6Q7R8S9T0VW";

fn gate(now: i64) -> ComplianceGate {
    ComplianceGate::new(SyncConfig::default().gate, Arc::new(ManualClock::new(now)))
}

fn admitted(gate: &ComplianceGate, category: &str) -> AnalyticsRecord {
    let raw = RawEvent {
        session_id: SESSION.to_string(),
        category: category.to_string(),
        indicators: json!({"score": 3, "lesson_step": 2})
            .as_object()
            .cloned()
            .unwrap(),
        timestamp: None,
    };
    match gate.admit(&raw) {
        Admission::Admitted(record) => record,
        other => panic!("expected admission, got {:?}", other),
    }
}

fn draft(batch_id: &str, record_ids: Vec<String>) -> SyncBatch {
    SyncBatch {
        batch_id: batch_id.to_string(),
        record_ids,
        batch_type: BatchType::Behavioral,
        priority: 12,
        status: BatchStatus::Pending,
        created_at: 0,
        scheduled_at: 0,
        next_retry_at: None,
        attempts: 0,
        max_retries: 3,
        retry_delay_base_ms: 1_000,
        requires_unmetered_network: false,
    }
}

#[test]
fn concurrent_assignment_claims_each_record_once() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let g = gate(1_000);
    let ids: Vec<String> = (0..20)
        .map(|_| {
            let rec = admitted(&g, "empathy");
            store.enqueue(&rec).expect("enqueue");
            rec.id
        })
        .collect();

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = store.clone();
            let ids = ids.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let batch_id = format!("B{}", i);
                let claimed = store.assign_to_batch(&ids, &batch_id).expect("assign");
                (batch_id, claimed)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        let (batch_id, claimed) = handle.join().expect("worker joined");
        total += claimed.len();
        for id in claimed {
            let rec = store.get_record(&id).expect("read").expect("exists");
            assert_eq!(rec.batch_id.as_deref(), Some(batch_id.as_str()));
            assert_eq!(rec.sync_state, SyncState::Assigned);
        }
    }
    assert_eq!(total, ids.len(), "every record claimed exactly once");
}

#[test]
fn purge_never_deletes_unsynced_or_assigned_records() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let g = gate(1_000);

    let unsynced = admitted(&g, "engagement");
    let assigned = admitted(&g, "empathy");
    let synced = admitted(&g, "app_usage");
    let failed = admitted(&g, "leadership");
    for rec in [&unsynced, &assigned, &synced, &failed] {
        store.enqueue(rec).expect("enqueue");
    }
    store
        .assign_to_batch(&[assigned.id.clone()], "B1")
        .expect("assign");
    store.mark_synced(&[synced.id.clone()]).expect("synced");
    store.mark_failed(&[failed.id.clone()]).expect("failed");

    let report = store
        .purge_older_than(1_000 + 365 * DAY_MS, SyncState::ALL)
        .expect("purge");
    assert_eq!(report.records, 2);
    assert!(store.get_record(&unsynced.id).unwrap().is_some());
    assert!(store.get_record(&assigned.id).unwrap().is_some());
    assert!(store.get_record(&synced.id).unwrap().is_none());
    assert!(store.get_record(&failed.id).unwrap().is_none());
}

#[test]
fn purge_respects_cutoff() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let old = admitted(&gate(1_000), "engagement");
    let fresh = admitted(&gate(10 * DAY_MS), "engagement");
    store.enqueue(&old).unwrap();
    store.enqueue(&fresh).unwrap();
    store
        .mark_synced(&[old.id.clone(), fresh.id.clone()])
        .unwrap();

    let report = store
        .purge_older_than(5 * DAY_MS, &[SyncState::Synced])
        .unwrap();
    assert_eq!(report.records, 1);
    assert!(store.get_record(&fresh.id).unwrap().is_some());
}

#[test]
fn batch_purge_is_keyed_on_creation_time() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let rec = admitted(&gate(1_000), "empathy");
    store.enqueue(&rec).unwrap();
    store
        .commit_planned_batch(&draft("B1", vec![rec.id.clone()]))
        .unwrap()
        .expect("claimed");

    // Sent long after it was created: scheduled_at moves past the cutoff.
    let sent = store.begin_transmission("B1", 10 * DAY_MS).unwrap();
    assert_eq!(sent.scheduled_at, 10 * DAY_MS);
    store.complete_batch("B1", &[]).unwrap();

    let report = store
        .purge_older_than(5 * DAY_MS, &[SyncState::Synced])
        .unwrap();
    assert_eq!(report.batches, 1);
    assert!(store.get_batch("B1").unwrap().is_none());
}

#[test]
fn planned_batch_shrinks_to_claimed_records() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let g = gate(1_000);
    let a = admitted(&g, "empathy");
    let b = admitted(&g, "empathy");
    store.enqueue(&a).unwrap();
    store.enqueue(&b).unwrap();
    store.assign_to_batch(&[a.id.clone()], "OTHER").unwrap();

    let batch = store
        .commit_planned_batch(&draft("B1", vec![a.id.clone(), b.id.clone()]))
        .unwrap()
        .expect("one record still claimable");
    assert_eq!(batch.record_ids, vec![b.id.clone()]);
    assert_eq!(store.get_batch("B1").unwrap().unwrap().record_ids, vec![b.id]);

    let none = store
        .commit_planned_batch(&draft("B2", vec![a.id.clone()]))
        .unwrap();
    assert!(none.is_none());
    assert!(store.get_batch("B2").unwrap().is_none());
}

#[test]
fn create_batch_refuses_unassigned_records() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let rec = admitted(&gate(1_000), "empathy");
    store.enqueue(&rec).unwrap();

    let err = store
        .create_batch(&draft("B1", vec![rec.id.clone()]))
        .unwrap_err();
    assert!(matches!(err, SyncError::ValidationError(_)));

    store.assign_to_batch(&[rec.id.clone()], "B1").unwrap();
    store.create_batch(&draft("B1", vec![rec.id])).unwrap();
    assert_eq!(store.count_by_status().unwrap().batches_in(BatchStatus::Pending), 1);
}

#[test]
fn transmission_lifecycle_updates_records_and_batches() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let g = gate(1_000);
    let ok = admitted(&g, "empathy");
    let refused = admitted(&g, "empathy");
    store.enqueue(&ok).unwrap();
    store.enqueue(&refused).unwrap();
    store
        .commit_planned_batch(&draft("B1", vec![ok.id.clone(), refused.id.clone()]))
        .unwrap()
        .unwrap();

    let in_flight = store.begin_transmission("B1", 5_000).unwrap();
    assert_eq!(in_flight.status, BatchStatus::InFlight);
    assert_eq!(in_flight.attempts, 1);
    assert!(store.begin_transmission("B1", 5_001).is_err());

    store
        .complete_batch("B1", std::slice::from_ref(&refused.id))
        .unwrap();
    assert_eq!(
        store.get_record(&ok.id).unwrap().unwrap().sync_state,
        SyncState::Synced
    );
    assert_eq!(
        store.get_record(&refused.id).unwrap().unwrap().sync_state,
        SyncState::Failed
    );
    assert_eq!(
        store.get_batch("B1").unwrap().unwrap().status,
        BatchStatus::Succeeded
    );
}

#[test]
fn failed_batch_keeps_records_assigned_until_terminal() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let rec = admitted(&gate(1_000), "confidence");
    store.enqueue(&rec).unwrap();
    store
        .commit_planned_batch(&draft("B1", vec![rec.id.clone()]))
        .unwrap()
        .unwrap();

    store.begin_transmission("B1", 0).unwrap();
    store
        .fail_batch("B1", FailureOutcome::Retryable { next_retry_at: 500 })
        .unwrap();
    assert_eq!(
        store.get_record(&rec.id).unwrap().unwrap().sync_state,
        SyncState::Assigned
    );
    assert!(store.get_retryable_batches(499).unwrap().is_empty());
    assert_eq!(store.get_retryable_batches(500).unwrap().len(), 1);

    store
        .update_batch_status("B1", BatchStatus::Pending, Some(500))
        .unwrap();
    store.begin_transmission("B1", 600).unwrap();
    store.fail_batch("B1", FailureOutcome::Terminal).unwrap();
    assert_eq!(
        store.get_record(&rec.id).unwrap().unwrap().sync_state,
        SyncState::Failed
    );
    assert_eq!(
        store.get_batch("B1").unwrap().unwrap().attempts,
        2
    );
}

#[test]
fn audit_log_never_contains_record_content() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    let rec = admitted(&gate(1_000), "empathy");
    store.enqueue(&rec).unwrap();
    store.bump_rejection("pii_email").unwrap();

    let raw = fs::read_to_string(tmp.path().join(AUDIT_LOG_NAME)).expect("audit log");
    assert!(raw.contains("records.enqueue"));
    assert!(!raw.contains(SESSION));
    assert!(!raw.contains("lesson_step"));

    let tail = store.broker().audit_tail(1).unwrap();
    assert_eq!(tail[0].op, "counters.bump_rejection");
}

#[test]
fn rejection_counters_accumulate() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open store");
    store.bump_rejection("pii_email").unwrap();
    store.bump_rejection("pii_email").unwrap();
    store.bump_rejection("unknown_category").unwrap();
    let counts = store.rejection_counts().unwrap();
    assert_eq!(counts.get("pii_email"), Some(&2));
    assert_eq!(counts.get("unknown_category"), Some(&1));
}

#[test]
fn store_survives_reopen() {
    let tmp = tempdir().expect("tempdir");
    let rec = admitted(&gate(1_000), "empathy");
    {
        let store = Store::open(tmp.path()).unwrap();
        store.enqueue(&rec).unwrap();
        store.set_analytics_enabled(false).unwrap();
    }
    let store = Store::open(tmp.path()).unwrap();
    assert_eq!(store.get_record(&rec.id).unwrap().unwrap(), rec);
    assert!(!store.analytics_enabled().unwrap());
}
