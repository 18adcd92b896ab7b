//! Batch planning: turn pending records into prioritized batches.

use crate::core::config::{BatchingConfig, RetryConfig, TierAdjustments};
use crate::core::error::SyncError;
use crate::core::model::{BatchStatus, BatchType, SyncBatch};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::network::{BatteryLevel, NetworkQuality, NetworkState, SyncStrategy};
use crate::plugins::retry::{self, RetryPolicy};

/// Behavioral records are planned before general ones.
const PLANNING_ORDER: [BatchType; 2] = [BatchType::Behavioral, BatchType::General];

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    batching: BatchingConfig,
    retry: RetryConfig,
}

fn quality_adjustment(adj: &TierAdjustments, quality: NetworkQuality) -> i32 {
    match quality {
        NetworkQuality::Poor => adj.poor_or_critical,
        NetworkQuality::Low => adj.low,
        NetworkQuality::Medium => adj.medium_or_normal,
        NetworkQuality::High => adj.high,
    }
}

fn battery_adjustment(adj: &TierAdjustments, battery: BatteryLevel) -> i32 {
    match battery {
        BatteryLevel::Critical => adj.poor_or_critical,
        BatteryLevel::Low => adj.low,
        BatteryLevel::Normal => adj.medium_or_normal,
        BatteryLevel::High => adj.high,
    }
}

impl BatchPlanner {
    pub fn new(batching: BatchingConfig, retry: RetryConfig) -> Self {
        Self { batching, retry }
    }

    pub fn batch_size_limit(&self, strategy: SyncStrategy) -> usize {
        self.batching.limits.get(strategy)
    }

    /// Base score by batch type plus network and battery adjustments, floored at 0.
    pub fn priority(&self, batch_type: BatchType, state: &NetworkState) -> u32 {
        let base = match batch_type {
            BatchType::Behavioral => self.batching.behavioral_base_priority,
            BatchType::General => self.batching.general_base_priority,
        } as i64;
        let score = base
            + quality_adjustment(&self.batching.quality_adjustment, state.quality) as i64
            + battery_adjustment(&self.batching.battery_adjustment, state.battery) as i64;
        score.clamp(0, u32::MAX as i64) as u32
    }

    pub fn retry_policy(&self, priority: u32) -> RetryPolicy {
        retry::policy_for(&self.retry, priority)
    }

    pub fn requires_unmetered(&self, priority: u32) -> bool {
        self.batching.wifi_only || priority < self.batching.unmetered_priority_floor
    }

    /// Unsaved batch over `record_ids`, sized and scored for the current conditions.
    pub fn draft(
        &self,
        batch_type: BatchType,
        record_ids: Vec<String>,
        state: &NetworkState,
        now: i64,
    ) -> SyncBatch {
        let priority = self.priority(batch_type, state);
        let policy = self.retry_policy(priority);
        SyncBatch {
            batch_id: time::new_id(),
            record_ids,
            batch_type,
            priority,
            status: BatchStatus::Pending,
            created_at: now,
            scheduled_at: now,
            next_retry_at: None,
            attempts: 0,
            max_retries: policy.max_retries,
            retry_delay_base_ms: policy.retry_delay_base_ms,
            requires_unmetered_network: self.requires_unmetered(priority),
        }
    }

    /// Create batches for pending records. The strategy's limit bounds the total number
    /// of records selected in this pass; behavioral records take it first.
    pub fn plan(
        &self,
        store: &Store,
        strategy: SyncStrategy,
        state: &NetworkState,
        now: i64,
    ) -> Result<Vec<SyncBatch>, SyncError> {
        let mut remaining = self.batch_size_limit(strategy);
        let mut planned = Vec::new();
        for batch_type in PLANNING_ORDER {
            if remaining == 0 {
                break;
            }
            let pending = store.select_pending_for(remaining, batch_type)?;
            if pending.is_empty() {
                continue;
            }
            let ids: Vec<String> = pending.into_iter().map(|r| r.id).collect();
            let selected = ids.len();
            let draft = self.draft(batch_type, ids, state, now);
            match store.commit_planned_batch(&draft)? {
                Some(batch) => {
                    if batch.record_ids.len() < selected {
                        tracing::debug!(
                            batch_id = %batch.batch_id,
                            selected,
                            claimed = batch.record_ids.len(),
                            "batch shrunk to claimed records"
                        );
                    }
                    remaining = remaining.saturating_sub(batch.record_ids.len());
                    tracing::info!(
                        batch_id = %batch.batch_id,
                        batch_type = %batch.batch_type,
                        records = batch.record_ids.len(),
                        priority = batch.priority,
                        "planned batch"
                    );
                    planned.push(batch);
                }
                None => {
                    tracing::debug!(%batch_type, selected, "records claimed concurrently; no batch");
                }
            }
        }
        Ok(planned)
    }
}
