use rusqlite;
use std::env;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Coordinator lease held by {0}")]
    CoordinatorBusy(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Storage-layer failures abort the current cycle only.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            SyncError::RusqliteError(_)
                | SyncError::IoError(_)
                | SyncError::DatabaseInitializationError(_)
        )
    }
}

/// Outcome classes of a failed transmission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Timeouts, refused connections, 5xx, 408 and 429. Retried per backoff policy.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// The server rejected the payload itself. Retrying cannot succeed.
    #[error("permanent rejection: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }

    /// Classify an HTTP status code that is not a success.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 => TransportError::Transient(format!("HTTP {}", status)),
            400..=499 => TransportError::Permanent(format!("HTTP {}", status)),
            _ => TransportError::Transient(format!("HTTP {}", status)),
        }
    }
}
