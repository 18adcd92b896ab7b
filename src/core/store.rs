//! Local analytics store: the on-device source of truth for records and batches.
//!
//! Every state transition goes through [`DbBroker::with_tx`], so transitions are atomic
//! against concurrent callers in this or any other process and survive restarts. The
//! "only from `unsynced`" precondition in [`Store::assign_to_batch`] is what keeps a record
//! from ever being claimed by two batches.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::SyncError;
use crate::core::model::{
    AnalyticsRecord, BatchStatus, BatchType, Category, Indicators, SyncBatch, SyncState,
};
use crate::core::schemas;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ACTOR: &str = "kindsync";

const RECORD_COLUMNS: &str =
    "id, session_id, category, indicators, timestamp, created_at, sync_state, batch_id";
const BATCH_COLUMNS: &str = "batch_id, record_ids, batch_type, priority, status, created_at, scheduled_at, next_retry_at, attempts, max_retries, retry_delay_base_ms, requires_unmetered";

/// Handle on an analytics data root (`<root>/analytics.db` plus audit log).
#[derive(Debug, Clone)]
pub struct Store {
    pub root: PathBuf,
    broker: DbBroker,
}

/// How a failed transmission leaves its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retryable { next_retry_at: i64 },
    Terminal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub records: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub batches: BTreeMap<String, u64>,
    pub records: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn batches_in(&self, status: BatchStatus) -> u64 {
        self.batches.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn records_in(&self, state: SyncState) -> u64 {
        self.records.get(state.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: i64,
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AnalyticsRecord> {
    let indicators_json: String = row.get(3)?;
    let indicators: Indicators =
        serde_json::from_str(&indicators_json).map_err(|e| conversion_err(3, e))?;
    Ok(AnalyticsRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        category: row.get(2)?,
        indicators,
        timestamp: row.get(4)?,
        created_at: row.get(5)?,
        sync_state: row.get(6)?,
        batch_id: row.get(7)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<SyncBatch> {
    let ids_json: String = row.get(1)?;
    let record_ids: Vec<String> =
        serde_json::from_str(&ids_json).map_err(|e| conversion_err(1, e))?;
    Ok(SyncBatch {
        batch_id: row.get(0)?,
        record_ids,
        batch_type: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        scheduled_at: row.get(6)?,
        next_retry_at: row.get(7)?,
        attempts: row.get(8)?,
        max_retries: row.get(9)?,
        retry_delay_base_ms: row.get(10)?,
        requires_unmetered_network: row.get(11)?,
    })
}

fn query_batches(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<SyncBatch>, SyncError> {
    let sql = format!("SELECT {} FROM batches {}", BATCH_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, batch_from_row)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(SyncError::RusqliteError)
}

fn load_batch(conn: &Connection, batch_id: &str) -> Result<Option<SyncBatch>, SyncError> {
    conn.query_row(
        &format!("SELECT {} FROM batches WHERE batch_id = ?1", BATCH_COLUMNS),
        params![batch_id],
        batch_from_row,
    )
    .optional()
    .map_err(SyncError::RusqliteError)
}

fn require_batch(conn: &Connection, batch_id: &str) -> Result<SyncBatch, SyncError> {
    load_batch(conn, batch_id)?.ok_or_else(|| SyncError::NotFound(format!("batch {}", batch_id)))
}

/// Claim `unsynced` records for `batch_id` inside an open transaction.
fn assign_in_tx(
    tx: &Transaction<'_>,
    record_ids: &[String],
    batch_id: &str,
) -> Result<Vec<String>, SyncError> {
    let mut stmt = tx.prepare(
        "UPDATE records SET sync_state = 'assigned', batch_id = ?2 WHERE id = ?1 AND sync_state = 'unsynced'",
    )?;
    let mut claimed = Vec::with_capacity(record_ids.len());
    for id in record_ids {
        if stmt.execute(params![id, batch_id])? == 1 {
            claimed.push(id.clone());
        }
    }
    Ok(claimed)
}

fn insert_batch_in_tx(tx: &Transaction<'_>, batch: &SyncBatch) -> Result<(), SyncError> {
    tx.execute(
        &format!(
            "INSERT INTO batches({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            BATCH_COLUMNS
        ),
        params![
            batch.batch_id,
            serde_json::to_string(&batch.record_ids)?,
            batch.batch_type,
            batch.priority,
            batch.status,
            batch.created_at,
            batch.scheduled_at,
            batch.next_retry_at,
            batch.attempts,
            batch.max_retries,
            batch.retry_delay_base_ms,
            batch.requires_unmetered_network,
        ],
    )?;
    Ok(())
}

fn set_record_state_in_tx(
    tx: &Transaction<'_>,
    record_ids: &[String],
    state: SyncState,
) -> Result<usize, SyncError> {
    let mut stmt = tx.prepare(
        "UPDATE records SET sync_state = ?2 WHERE id = ?1 AND sync_state IN ('unsynced', 'assigned')",
    )?;
    let mut changed = 0;
    for id in record_ids {
        changed += stmt.execute(params![id, state])?;
    }
    Ok(changed)
}

/// Fail every record still claimed by a batch that just became terminal.
fn fail_claimed_records_in_tx(tx: &Transaction<'_>, batch_id: &str) -> Result<usize, SyncError> {
    Ok(tx.execute(
        "UPDATE records SET sync_state = 'failed' WHERE batch_id = ?1 AND sync_state = 'assigned'",
        params![batch_id],
    )?)
}

fn meta_get_conn(conn: &Connection, key: &str) -> Result<Option<String>, SyncError> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(SyncError::RusqliteError)
}

fn meta_set_tx(tx: &Transaction<'_>, key: &str, value: &str) -> Result<(), SyncError> {
    tx.execute(
        "INSERT INTO meta(key, value) VALUES(?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

impl Store {
    /// Open (creating if needed) the analytics database under `root`.
    pub fn open(root: &Path) -> Result<Self, SyncError> {
        let db_path = db::initialize_analytics_db(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            broker: DbBroker::new(root, &db_path),
        })
    }

    pub fn broker(&self) -> &DbBroker {
        &self.broker
    }

    // --- records ---

    /// Insert an admitted record as `unsynced`. Returns `false` if the id already exists.
    pub fn enqueue(&self, record: &AnalyticsRecord) -> Result<bool, SyncError> {
        let indicators = serde_json::to_string(&record.indicators)?;
        self.broker.with_tx(ACTOR, "records.enqueue", |tx| {
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO records({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, 'unsynced', NULL)",
                    RECORD_COLUMNS
                ),
                params![
                    record.id,
                    record.session_id,
                    record.category,
                    indicators,
                    record.timestamp,
                    record.created_at,
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_record(&self, id: &str) -> Result<Option<AnalyticsRecord>, SyncError> {
        self.broker.with_read("records.get", |conn| {
            conn.query_row(
                &format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                record_from_row,
            )
            .optional()
            .map_err(SyncError::RusqliteError)
        })
    }

    /// Records for `ids`, in the order given. Missing ids are skipped.
    pub fn records_by_ids(&self, ids: &[String]) -> Result<Vec<AnalyticsRecord>, SyncError> {
        self.broker.with_read("records.by_ids", |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS))?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(rec) = stmt.query_row(params![id], record_from_row).optional()? {
                    out.push(rec);
                }
            }
            Ok(out)
        })
    }

    /// Unsynced records, oldest first, optionally for a single category.
    pub fn select_pending(
        &self,
        limit: usize,
        category: Option<Category>,
    ) -> Result<Vec<AnalyticsRecord>, SyncError> {
        match category {
            Some(c) => self.select_pending_in(limit, &[c]),
            None => self.select_pending_in(limit, Category::ALL),
        }
    }

    /// Unsynced records of one batch type, oldest first.
    pub fn select_pending_for(
        &self,
        limit: usize,
        batch_type: BatchType,
    ) -> Result<Vec<AnalyticsRecord>, SyncError> {
        self.select_pending_in(limit, &batch_type.categories())
    }

    fn select_pending_in(
        &self,
        limit: usize,
        categories: &[Category],
    ) -> Result<Vec<AnalyticsRecord>, SyncError> {
        if limit == 0 || categories.is_empty() {
            return Ok(vec![]);
        }
        self.broker.with_read("records.select_pending", |conn| {
            let placeholders = (0..categories.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {} FROM records WHERE sync_state = 'unsynced' AND category IN ({}) ORDER BY created_at ASC, id ASC LIMIT ?1",
                RECORD_COLUMNS, placeholders
            );
            let mut values: Vec<Value> = vec![Value::Integer(limit as i64)];
            values.extend(categories.iter().map(|c| Value::Text(c.as_str().to_string())));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), record_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(SyncError::RusqliteError)
        })
    }

    /// Atomically move `unsynced` records to `assigned` under `batch_id`.
    ///
    /// Records in any other state are left alone. Returns the ids actually claimed.
    pub fn assign_to_batch(
        &self,
        record_ids: &[String],
        batch_id: &str,
    ) -> Result<Vec<String>, SyncError> {
        self.broker.with_tx(ACTOR, "records.assign_to_batch", |tx| {
            assign_in_tx(tx, record_ids, batch_id)
        })
    }

    pub fn mark_synced(&self, record_ids: &[String]) -> Result<usize, SyncError> {
        self.broker.with_tx(ACTOR, "records.mark_synced", |tx| {
            set_record_state_in_tx(tx, record_ids, SyncState::Synced)
        })
    }

    pub fn mark_failed(&self, record_ids: &[String]) -> Result<usize, SyncError> {
        self.broker.with_tx(ACTOR, "records.mark_failed", |tx| {
            set_record_state_in_tx(tx, record_ids, SyncState::Failed)
        })
    }

    /// Delete terminal records and terminal batches created before `cutoff`. `unsynced`
    /// and `assigned` records are never deleted, whatever `states` asks for.
    pub fn purge_older_than(
        &self,
        cutoff: i64,
        states: &[SyncState],
    ) -> Result<PurgeReport, SyncError> {
        let purgeable: Vec<SyncState> = states.iter().copied().filter(|s| s.is_terminal()).collect();
        self.broker.with_tx(ACTOR, "records.purge_older_than", |tx| {
            let mut report = PurgeReport::default();
            for state in &purgeable {
                report.records += tx.execute(
                    "DELETE FROM records WHERE sync_state = ?1 AND created_at < ?2",
                    params![state, cutoff],
                )?;
            }
            report.batches = tx.execute(
                "DELETE FROM batches WHERE status IN ('succeeded', 'failed_terminal') AND created_at < ?1",
                params![cutoff],
            )?;
            Ok(report)
        })
    }

    /// Remove every record, batch and counter. Used when analytics is switched off.
    pub fn purge_all(&self) -> Result<PurgeReport, SyncError> {
        self.broker.with_tx(ACTOR, "store.purge_all", |tx| {
            let records = tx.execute("DELETE FROM records", [])?;
            let batches = tx.execute("DELETE FROM batches", [])?;
            tx.execute("DELETE FROM rejection_counters", [])?;
            Ok(PurgeReport { records, batches })
        })
    }

    // --- batches ---

    /// Insert a batch whose records are already assigned to it.
    pub fn create_batch(&self, batch: &SyncBatch) -> Result<(), SyncError> {
        if batch.record_ids.is_empty() {
            return Err(SyncError::ValidationError(
                "a batch needs at least one record".to_string(),
            ));
        }
        self.broker.with_tx(ACTOR, "batches.create", |tx| {
            let mut stmt = tx.prepare(
                "SELECT COUNT(*) FROM records WHERE id = ?1 AND batch_id = ?2 AND sync_state = 'assigned'",
            )?;
            for id in &batch.record_ids {
                let owned: i64 = stmt.query_row(params![id, batch.batch_id], |r| r.get(0))?;
                if owned != 1 {
                    return Err(SyncError::ValidationError(format!(
                        "record {} is not assigned to batch {}",
                        id, batch.batch_id
                    )));
                }
            }
            insert_batch_in_tx(tx, batch)
        })
    }

    /// Claim the draft's records and insert the batch in one transaction.
    ///
    /// The batch shrinks to the records actually claimed; nothing is written when no
    /// record could be claimed.
    pub fn commit_planned_batch(&self, draft: &SyncBatch) -> Result<Option<SyncBatch>, SyncError> {
        self.broker.with_tx(ACTOR, "batches.commit_planned", |tx| {
            let claimed = assign_in_tx(tx, &draft.record_ids, &draft.batch_id)?;
            if claimed.is_empty() {
                return Ok(None);
            }
            let batch = SyncBatch {
                record_ids: claimed,
                ..draft.clone()
            };
            insert_batch_in_tx(tx, &batch)?;
            Ok(Some(batch))
        })
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<Option<SyncBatch>, SyncError> {
        self.broker
            .with_read("batches.get", |conn| load_batch(conn, batch_id))
    }

    /// Set a non-terminal batch's status (and retry instant).
    ///
    /// Terminal batches never change again; attempting it is a validation error.
    pub fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        next_retry_at: Option<i64>,
    ) -> Result<(), SyncError> {
        self.broker.with_tx(ACTOR, "batches.update_status", |tx| {
            let current = require_batch(tx, batch_id)?;
            if current.status.is_terminal() {
                return Err(SyncError::ValidationError(format!(
                    "batch {} is {} and cannot move to {}",
                    batch_id, current.status, status
                )));
            }
            tx.execute(
                "UPDATE batches SET status = ?2, next_retry_at = ?3 WHERE batch_id = ?1",
                params![batch_id, status, next_retry_at],
            )?;
            if status == BatchStatus::FailedTerminal {
                fail_claimed_records_in_tx(tx, batch_id)?;
            }
            Ok(())
        })
    }

    /// Move a pending batch to `in_flight`, counting the attempt.
    pub fn begin_transmission(&self, batch_id: &str, now: i64) -> Result<SyncBatch, SyncError> {
        self.broker.with_tx(ACTOR, "batches.begin_transmission", |tx| {
            let current = require_batch(tx, batch_id)?;
            if current.status != BatchStatus::Pending {
                return Err(SyncError::ValidationError(format!(
                    "batch {} is {}, expected pending",
                    batch_id, current.status
                )));
            }
            tx.execute(
                "UPDATE batches SET status = 'in_flight', attempts = attempts + 1, scheduled_at = ?2 WHERE batch_id = ?1",
                params![batch_id, now],
            )?;
            require_batch(tx, batch_id)
        })
    }

    /// Finish a successful transmission. Records the server refused individually become
    /// `failed`; the rest become `synced`.
    pub fn complete_batch(
        &self,
        batch_id: &str,
        rejected_record_ids: &[String],
    ) -> Result<(), SyncError> {
        self.broker.with_tx(ACTOR, "batches.complete", |tx| {
            let batch = require_batch(tx, batch_id)?;
            if batch.status != BatchStatus::InFlight {
                return Err(SyncError::ValidationError(format!(
                    "batch {} is {}, expected in_flight",
                    batch_id, batch.status
                )));
            }
            let (failed, synced): (Vec<String>, Vec<String>) = batch
                .record_ids
                .iter()
                .cloned()
                .partition(|id| rejected_record_ids.contains(id));
            set_record_state_in_tx(tx, &synced, SyncState::Synced)?;
            set_record_state_in_tx(tx, &failed, SyncState::Failed)?;
            tx.execute(
                "UPDATE batches SET status = 'succeeded', next_retry_at = NULL WHERE batch_id = ?1",
                params![batch_id],
            )?;
            Ok(())
        })
    }

    /// Record a failed transmission of an in-flight batch.
    pub fn fail_batch(&self, batch_id: &str, outcome: FailureOutcome) -> Result<(), SyncError> {
        self.broker.with_tx(ACTOR, "batches.fail", |tx| {
            let batch = require_batch(tx, batch_id)?;
            if batch.status != BatchStatus::InFlight {
                return Err(SyncError::ValidationError(format!(
                    "batch {} is {}, expected in_flight",
                    batch_id, batch.status
                )));
            }
            match outcome {
                FailureOutcome::Retryable { next_retry_at } => {
                    tx.execute(
                        "UPDATE batches SET status = 'failed_retryable', next_retry_at = ?2 WHERE batch_id = ?1",
                        params![batch_id, next_retry_at],
                    )?;
                }
                FailureOutcome::Terminal => {
                    tx.execute(
                        "UPDATE batches SET status = 'failed_terminal', next_retry_at = NULL WHERE batch_id = ?1",
                        params![batch_id],
                    )?;
                    fail_claimed_records_in_tx(tx, batch_id)?;
                }
            }
            Ok(())
        })
    }

    /// `failed_retryable` batches whose `next_retry_at` has passed.
    pub fn get_retryable_batches(&self, now: i64) -> Result<Vec<SyncBatch>, SyncError> {
        self.broker.with_read("batches.retryable", |conn| {
            query_batches(
                conn,
                "WHERE status = 'failed_retryable' AND (next_retry_at IS NULL OR next_retry_at <= ?1) ORDER BY priority DESC, created_at ASC",
                params![now],
            )
        })
    }

    /// Batches in `status`, most urgent first, oldest first among equals.
    pub fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<SyncBatch>, SyncError> {
        self.broker.with_read("batches.by_status", |conn| {
            query_batches(
                conn,
                "WHERE status = ?1 ORDER BY priority DESC, created_at ASC, batch_id ASC",
                params![status],
            )
        })
    }

    pub fn count_by_status(&self) -> Result<StatusCounts, SyncError> {
        self.broker.with_read("store.count_by_status", |conn| {
            let mut counts = StatusCounts::default();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM batches GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, n) = row?;
                counts.batches.insert(status, n as u64);
            }
            let mut stmt =
                conn.prepare("SELECT sync_state, COUNT(*) FROM records GROUP BY sync_state")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (state, n) = row?;
                counts.records.insert(state, n as u64);
            }
            Ok(counts)
        })
    }

    // --- counters & meta ---

    /// Bump the aggregate counter for a rejection reason code. Nothing else about the
    /// rejected event is stored.
    pub fn bump_rejection(&self, reason_code: &str) -> Result<(), SyncError> {
        self.broker.with_tx(ACTOR, "counters.bump_rejection", |tx| {
            tx.execute(
                "INSERT INTO rejection_counters(reason, count) VALUES(?1, 1) ON CONFLICT(reason) DO UPDATE SET count = count + 1",
                params![reason_code],
            )?;
            Ok(())
        })
    }

    pub fn rejection_counts(&self) -> Result<BTreeMap<String, u64>, SyncError> {
        self.broker.with_read("counters.list", |conn| {
            let mut stmt = conn.prepare("SELECT reason, count FROM rejection_counters")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (reason, n) = row?;
                out.insert(reason, n as u64);
            }
            Ok(out)
        })
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, SyncError> {
        self.broker
            .with_read("meta.get", |conn| meta_get_conn(conn, key))
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.broker
            .with_tx(ACTOR, "meta.set", |tx| meta_set_tx(tx, key, value))
    }

    pub fn meta_get_i64(&self, key: &str) -> Result<Option<i64>, SyncError> {
        Ok(self.meta_get(key)?.and_then(|v| v.parse().ok()))
    }

    pub fn analytics_enabled(&self) -> Result<bool, SyncError> {
        Ok(self
            .meta_get(schemas::META_ANALYTICS_ENABLED)?
            .map(|v| v != "false")
            .unwrap_or(true))
    }

    pub fn set_analytics_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.meta_set(
            schemas::META_ANALYTICS_ENABLED,
            if enabled { "true" } else { "false" },
        )
    }

    /// Take or renew the coordinator lease. Returns the foreign holder when another owner
    /// holds an unexpired lease.
    pub fn acquire_lease(
        &self,
        owner: &str,
        now: i64,
        ttl_ms: i64,
    ) -> Result<Result<Lease, Lease>, SyncError> {
        self.broker.with_tx(ACTOR, "meta.acquire_lease", |tx| {
            if let Some(raw) = meta_get_conn(tx, schemas::META_COORDINATOR_LEASE)? {
                let held: Lease = serde_json::from_str(&raw)?;
                if held.owner != owner && held.expires_at > now {
                    return Ok(Err(held));
                }
            }
            let lease = Lease {
                owner: owner.to_string(),
                expires_at: now + ttl_ms,
            };
            meta_set_tx(
                tx,
                schemas::META_COORDINATOR_LEASE,
                &serde_json::to_string(&lease)?,
            )?;
            Ok(Ok(lease))
        })
    }

    pub fn release_lease(&self, owner: &str) -> Result<(), SyncError> {
        self.broker.with_tx(ACTOR, "meta.release_lease", |tx| {
            if let Some(raw) = meta_get_conn(tx, schemas::META_COORDINATOR_LEASE)? {
                let held: Lease = serde_json::from_str(&raw)?;
                if held.owner == owner {
                    tx.execute(
                        "DELETE FROM meta WHERE key = ?1",
                        params![schemas::META_COORDINATOR_LEASE],
                    )?;
                }
            }
            Ok(())
        })
    }
}
