//! Retry bookkeeping for failed batches.
//!
//! The scheduler never transmits. It only decides, per `failed_retryable` batch, whether
//! the batch goes back to `pending` or is closed as `failed_terminal`, and computes the
//! backoff instant after a failure.

use crate::core::config::RetryConfig;
use crate::core::error::{SyncError, TransportError};
use crate::core::model::{BatchStatus, SyncBatch};
use crate::core::store::{FailureOutcome, Store};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry budget and base delay granted to a batch at planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_base_ms: i64,
}

/// Tier lookup: the first tier whose `min_priority` the batch reaches.
pub fn policy_for(config: &RetryConfig, priority: u32) -> RetryPolicy {
    let tier = config
        .tiers
        .iter()
        .find(|t| priority >= t.min_priority)
        .or_else(|| config.tiers.last());
    match tier {
        Some(t) => RetryPolicy {
            max_retries: t.max_retries,
            retry_delay_base_ms: ((config.base_delay_ms as f64) * t.delay_multiplier).round()
                as i64,
        },
        None => RetryPolicy {
            max_retries: 1,
            retry_delay_base_ms: config.base_delay_ms,
        },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReport {
    pub released: usize,
    pub exhausted: usize,
}

#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Budget remains and the backoff instant has passed.
    pub fn should_retry(&self, batch: &SyncBatch, now: i64) -> bool {
        !batch.retry_budget_exhausted() && batch.next_retry_at.is_none_or(|at| now >= at)
    }

    /// Un-jittered backoff: `retry_delay_base_ms * 2^attempts`, capped.
    pub fn backoff_delay_ms(&self, batch: &SyncBatch) -> i64 {
        let exp = batch.attempts.min(30);
        batch
            .retry_delay_base_ms
            .saturating_mul(1i64 << exp)
            .min(self.config.max_delay_ms)
    }

    pub fn compute_next_retry_at(&self, batch: &SyncBatch, now: i64) -> i64 {
        self.compute_next_retry_at_with(batch, now, &mut rand::thread_rng())
    }

    /// Same as [`Self::compute_next_retry_at`] with an injected random source.
    pub fn compute_next_retry_at_with<R: Rng + ?Sized>(
        &self,
        batch: &SyncBatch,
        now: i64,
        rng: &mut R,
    ) -> i64 {
        let delay = self.backoff_delay_ms(batch);
        let max_jitter = ((delay as f64) * self.config.jitter_ratio) as i64;
        let jitter = if max_jitter > 0 {
            rng.gen_range(0..=max_jitter)
        } else {
            0
        };
        now.saturating_add(delay).saturating_add(jitter)
    }

    /// How a failed transmission of `batch` (attempts already counted) should land.
    pub fn outcome_for_failure(
        &self,
        batch: &SyncBatch,
        error: &TransportError,
        now: i64,
    ) -> FailureOutcome {
        if !error.is_retryable() || batch.retry_budget_exhausted() {
            return FailureOutcome::Terminal;
        }
        FailureOutcome::Retryable {
            next_retry_at: self.compute_next_retry_at(batch, now),
        }
    }

    /// Move due `failed_retryable` batches back to `pending`, and close the ones whose
    /// budget is spent.
    pub fn release_due(&self, store: &Store, now: i64) -> Result<ReleaseReport, SyncError> {
        let mut report = ReleaseReport::default();
        for batch in store.get_retryable_batches(now)? {
            if batch.retry_budget_exhausted() {
                store.update_batch_status(&batch.batch_id, BatchStatus::FailedTerminal, None)?;
                tracing::info!(
                    batch_id = %batch.batch_id,
                    attempts = batch.attempts,
                    "retry budget exhausted"
                );
                report.exhausted += 1;
            } else if self.should_retry(&batch, now) {
                store.update_batch_status(&batch.batch_id, BatchStatus::Pending, batch.next_retry_at)?;
                report.released += 1;
            }
        }
        Ok(report)
    }
}
