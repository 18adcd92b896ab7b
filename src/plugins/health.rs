//! Observational sync health.
//!
//! Classification is a pure function of store counts and the last cycle outcome; nothing
//! here changes engine behavior.

use crate::core::config::HealthConfig;
use crate::core::error::SyncError;
use crate::core::model::{BatchStatus, SyncState};
use crate::core::schemas;
use crate::core::store::{StatusCounts, Store};
use crate::core::time::DAY_MS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pending records with no successful sync for this long earn a recommendation.
const STALE_SYNC_MS: i64 = 7 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Concerning,
    Backlog,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Concerning => "concerning",
            HealthStatus::Backlog => "backlog",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInputs {
    /// `pending` plus `in_flight` batches.
    pub pending_batches: u64,
    /// Failed batches with retry budget left.
    pub failed_retryable_batches: u64,
    /// Batches that will never be retried, kept on disk until the retention purge.
    pub failed_terminal_batches: u64,
    /// `unsynced` plus `assigned` records.
    pub pending_events: u64,
    pub last_cycle_error: Option<String>,
    pub last_successful_sync_at: Option<i64>,
}

impl HealthInputs {
    pub fn from_counts(counts: &StatusCounts) -> Self {
        Self {
            pending_batches: counts.batches_in(BatchStatus::Pending)
                + counts.batches_in(BatchStatus::InFlight),
            failed_retryable_batches: counts.batches_in(BatchStatus::FailedRetryable),
            failed_terminal_batches: counts.batches_in(BatchStatus::FailedTerminal),
            pending_events: counts.records_in(SyncState::Unsynced)
                + counts.records_in(SyncState::Assigned),
            last_cycle_error: None,
            last_successful_sync_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub pending_batches: u64,
    /// Retryable plus terminal.
    pub failed_batches: u64,
    pub terminal_batches: u64,
    pub pending_events: u64,
    pub recommendations: Vec<String>,
}

pub fn compute_health(inputs: &HealthInputs, config: &HealthConfig, now: i64) -> HealthReport {
    let cycle_failed = inputs.last_cycle_error.is_some();
    let retrying = inputs.failed_retryable_batches;
    let status = if cycle_failed || retrying >= config.unhealthy_failed_batches {
        HealthStatus::Unhealthy
    } else if inputs.pending_events >= config.backlog_pending_events
        || inputs.pending_batches >= config.backlog_pending_batches
    {
        HealthStatus::Backlog
    } else if retrying >= 1 || inputs.pending_events >= config.concerning_pending_events
    {
        HealthStatus::Concerning
    } else {
        HealthStatus::Healthy
    };

    let mut recommendations = Vec::new();
    if cycle_failed {
        recommendations.push(
            "Local storage failed during the last sync cycle; it will be retried on the next run."
                .to_string(),
        );
    }
    if retrying >= config.unhealthy_failed_batches {
        recommendations
            .push("Many batches keep failing; check ingestion endpoint availability.".to_string());
    } else if retrying >= 1 {
        recommendations.push("Some batches failed and will be retried automatically.".to_string());
    }
    if inputs.failed_terminal_batches >= 1 {
        recommendations.push(format!(
            "{} batch(es) were rejected and will not be retried; their records are dropped at the retention purge.",
            inputs.failed_terminal_batches
        ));
    }
    if status == HealthStatus::Backlog {
        recommendations.push(
            "Sync backlog detected; connect to Wi-Fi and keep the device charged to catch up."
                .to_string(),
        );
    }
    let stale = match inputs.last_successful_sync_at {
        Some(at) => now - at >= STALE_SYNC_MS,
        None => false,
    };
    if stale && inputs.pending_events > 0 {
        recommendations.push("No successful sync in over a week.".to_string());
    }

    HealthReport {
        status,
        pending_batches: inputs.pending_batches,
        failed_batches: inputs.failed_retryable_batches + inputs.failed_terminal_batches,
        terminal_batches: inputs.failed_terminal_batches,
        pending_events: inputs.pending_events,
        recommendations,
    }
}

/// Gather inputs from the store and classify.
pub fn report(store: &Store, config: &HealthConfig, now: i64) -> Result<HealthReport, SyncError> {
    let mut inputs = HealthInputs::from_counts(&store.count_by_status()?);
    inputs.last_cycle_error = store
        .meta_get(schemas::META_LAST_CYCLE_ERROR)?
        .filter(|e| !e.is_empty());
    inputs.last_successful_sync_at = store.meta_get_i64(schemas::META_LAST_SYNC_AT)?;
    Ok(compute_health(&inputs, config, now))
}
