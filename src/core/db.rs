use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Busy timeout for every connection, in seconds.
const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, error::SyncError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
        .map_err(error::SyncError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::SyncError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::SyncError::RusqliteError)?;
    Ok(conn)
}

pub fn analytics_db_path(root: &Path) -> PathBuf {
    root.join(schemas::ANALYTICS_DB_NAME)
}

/// Create the data root and all analytics tables. Idempotent.
pub fn initialize_analytics_db(root: &Path) -> Result<PathBuf, error::SyncError> {
    fs::create_dir_all(root).map_err(error::SyncError::IoError)?;
    let db_path = analytics_db_path(root);
    let conn = db_connect(&db_path.to_string_lossy()).map_err(|e| {
        error::SyncError::DatabaseInitializationError(format!("{}: {}", db_path.display(), e))
    })?;
    for schema in schemas::ANALYTICS_DB_SCHEMAS {
        conn.execute(schema, [])?;
    }
    Ok(db_path)
}
