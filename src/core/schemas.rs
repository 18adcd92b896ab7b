//! Schema definitions for the on-device analytics database.
//!
//! One SQLite file (`analytics.db`) holds the record queue, the batch table, the
//! aggregate rejection counters and a small key/value `meta` table for engine flags.

pub const ANALYTICS_DB_NAME: &str = "analytics.db";

pub const ANALYTICS_DB_SCHEMA_RECORDS: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        category TEXT NOT NULL,
        indicators TEXT NOT NULL, -- JSON object of primitive values
        timestamp INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        sync_state TEXT NOT NULL DEFAULT 'unsynced',
        batch_id TEXT
    )
";
pub const ANALYTICS_DB_SCHEMA_RECORDS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_state_created ON records(sync_state, created_at)";

pub const ANALYTICS_DB_SCHEMA_BATCHES: &str = "
    CREATE TABLE IF NOT EXISTS batches (
        batch_id TEXT PRIMARY KEY,
        record_ids TEXT NOT NULL, -- JSON array, ordered
        batch_type TEXT NOT NULL,
        priority INTEGER NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        scheduled_at INTEGER NOT NULL,
        next_retry_at INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL,
        retry_delay_base_ms INTEGER NOT NULL,
        requires_unmetered INTEGER NOT NULL DEFAULT 0
    )
";
pub const ANALYTICS_DB_SCHEMA_BATCHES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status, priority)";

pub const ANALYTICS_DB_SCHEMA_REJECTIONS: &str = "
    CREATE TABLE IF NOT EXISTS rejection_counters (
        reason TEXT PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 0
    )
";

pub const ANALYTICS_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const ANALYTICS_DB_SCHEMAS: &[&str] = &[
    ANALYTICS_DB_SCHEMA_RECORDS,
    ANALYTICS_DB_SCHEMA_RECORDS_INDEX,
    ANALYTICS_DB_SCHEMA_BATCHES,
    ANALYTICS_DB_SCHEMA_BATCHES_INDEX,
    ANALYTICS_DB_SCHEMA_REJECTIONS,
    ANALYTICS_DB_SCHEMA_META,
];

// meta keys
pub const META_ANALYTICS_ENABLED: &str = "analytics_enabled";
pub const META_LAST_PURGE_AT: &str = "last_purge_at";
pub const META_LAST_SYNC_AT: &str = "last_successful_sync_at";
pub const META_COORDINATOR_LEASE: &str = "coordinator_lease";
pub const META_LAST_CYCLE_ERROR: &str = "last_cycle_error";
