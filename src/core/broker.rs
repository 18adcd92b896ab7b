use crate::core::db;
use crate::core::error::SyncError;
use crate::core::time;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use ulid::Ulid;

/// Maximum retry attempts for busy/locked errors.
const MAX_BUSY_RETRIES: u32 = 5;
/// Base delay for exponential backoff (milliseconds).
const BUSY_BASE_DELAY_MS: u64 = 50;
/// Maximum delay cap (milliseconds).
const BUSY_MAX_DELAY_MS: u64 = 2_000;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the single path for state access to the analytics database.
///
/// Every state transition runs inside an IMMEDIATE transaction on a fresh connection, so
/// concurrent writers (threads or processes) serialize at the database, and a failure
/// rolls the whole operation back. Each operation appends one audit line carrying its
/// name and outcome; payloads are never written to the audit log.
#[derive(Debug, Clone)]
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path, db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            audit_log_path: root.join(AUDIT_LOG_NAME),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a read-only closure on a fresh connection.
    pub fn with_read<F, R>(&self, op_name: &str, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Connection) -> Result<R, SyncError>,
    {
        let conn = db::db_connect(&self.db_path.to_string_lossy())?;
        f(&conn).inspect_err(|e| tracing::debug!(op = op_name, error = %e, "read failed"))
    }

    /// Run a closure inside an IMMEDIATE transaction, committing on `Ok`.
    ///
    /// The closure may run more than once when SQLite reports the database busy.
    pub fn with_tx<F, R>(&self, actor: &str, op_name: &str, mut f: F) -> Result<R, SyncError>
    where
        F: FnMut(&Transaction<'_>) -> Result<R, SyncError>,
    {
        let result = retry_on_busy(|| {
            let mut conn = db::db_connect(&self.db_path.to_string_lossy())?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        });

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, status);

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: Ulid::new().to_string(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: self
                .db_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            status: status.to_string(),
        };

        // The transaction outcome is already decided; a lost audit line must not flip it.
        let written = serde_json::to_string(&ev)
            .map_err(SyncError::JsonError)
            .and_then(|line| {
                let mut f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.audit_log_path)?;
                writeln!(f, "{}", line)?;
                Ok(())
            });
        if let Err(e) = written {
            tracing::warn!(op, error = %e, "failed to append broker audit event");
        }
    }

    /// Last `n` audit events, oldest first.
    pub fn audit_tail(&self, n: usize) -> Result<Vec<BrokerEvent>, SyncError> {
        if !self.audit_log_path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&self.audit_log_path)?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .map(|l| serde_json::from_str(l).map_err(SyncError::JsonError))
            .collect()
    }
}

/// Retry a closure on `SQLITE_BUSY` / `SQLITE_LOCKED` with exponential backoff.
fn retry_on_busy<F, R>(mut f: F) -> Result<R, SyncError>
where
    F: FnMut() -> Result<R, SyncError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < MAX_BUSY_RETRIES => {
                attempt += 1;
                let delay_ms =
                    (BUSY_BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(BUSY_MAX_DELAY_MS);
                thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error is a SQLite busy/locked error that is retryable.
fn is_busy_error(err: &SyncError) -> bool {
    match err {
        SyncError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
