//! Sync control loop.
//!
//! One cycle is an explicit sequence: derive strategy, plan batches, release due retries,
//! transmit pending batches highest priority first, then purge when the daily interval
//! has passed. Cancellation is checked between steps and between batches. A batch that is
//! `in_flight` when the process dies, or when a cycle fails while settling it, is picked up
//! by orphan recovery on the next start or cycle.

use crate::core::config::SyncConfig;
use crate::core::error::{SyncError, TransportError};
use crate::core::model::{BatchStatus, SyncBatch, SyncState};
use crate::core::schemas;
use crate::core::store::{FailureOutcome, PurgeReport, Store};
use crate::core::time::{self, Clock, DAY_MS, SECOND_MS};
use crate::plugins::compliance::{Admission, ComplianceGate, RawEvent};
use crate::plugins::health::{self, HealthReport};
use crate::plugins::network::{
    NetworkConditionMonitor, NetworkProbe, NetworkState, SchedulerConstraints, SyncStrategy,
};
use crate::plugins::planner::BatchPlanner;
use crate::plugins::retry::RetryScheduler;
use crate::plugins::transport::{BatchPayload, Transport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Granularity of the sleep between cycles; bounds how long cancellation can go unseen.
const SLEEP_SLICE_MS: u64 = 250;

/// Shared cancellation flag, honored at cycle and batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a cycle needs, built once at process start and passed in explicitly.
pub struct SyncContext {
    pub store: Store,
    pub config: SyncConfig,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelToken,
}

impl SyncContext {
    pub fn new(store: Store, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            cancel: CancelToken::new(),
        }
    }

    /// Open the store under `root` and load `kindsync.toml` from the same directory.
    pub fn open(root: &Path, clock: Arc<dyn Clock>) -> Result<Self, SyncError> {
        let store = Store::open(root)?;
        let config = SyncConfig::load(root)?;
        Ok(Self::new(store, config, clock))
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded,
    FailedRetryable,
    FailedTerminal,
    /// Held back until an unmetered network is available.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub strategy: SyncStrategy,
    pub analytics_enabled: bool,
    pub planned: usize,
    pub released: usize,
    pub exhausted: usize,
    /// `in_flight` batches left behind by an earlier failed cycle or process.
    pub recovered: usize,
    pub succeeded: usize,
    pub failed_retryable: usize,
    pub failed_terminal: usize,
    pub deferred: usize,
    pub purged: Option<PurgeReport>,
    pub next_cycle_secs: u64,
}

impl CycleReport {
    fn idle(strategy: SyncStrategy, analytics_enabled: bool, next_cycle_secs: u64) -> Self {
        Self {
            strategy,
            analytics_enabled,
            planned: 0,
            released: 0,
            exhausted: 0,
            recovered: 0,
            succeeded: 0,
            failed_retryable: 0,
            failed_terminal: 0,
            deferred: 0,
            purged: None,
            next_cycle_secs,
        }
    }

    fn count(&mut self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Succeeded => self.succeeded += 1,
            BatchOutcome::FailedRetryable => self.failed_retryable += 1,
            BatchOutcome::FailedTerminal => self.failed_terminal += 1,
            BatchOutcome::Deferred => self.deferred += 1,
        }
    }
}

pub struct SyncCoordinator {
    ctx: SyncContext,
    owner: String,
    gate: ComplianceGate,
    planner: BatchPlanner,
    retry: RetryScheduler,
    monitor: NetworkConditionMonitor,
    transport: Box<dyn Transport>,
}

impl SyncCoordinator {
    pub fn new(
        ctx: SyncContext,
        probe: Box<dyn NetworkProbe>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let gate = ComplianceGate::new(ctx.config.gate.clone(), ctx.clock.clone());
        let planner = BatchPlanner::new(ctx.config.batching.clone(), ctx.config.retry.clone());
        let retry = RetryScheduler::new(ctx.config.retry.clone());
        Self {
            owner: time::new_id(),
            gate,
            planner,
            retry,
            monitor: NetworkConditionMonitor::new(probe),
            transport,
            ctx,
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    /// Admission entrypoint for the application layer.
    ///
    /// Rejections only bump an aggregate counter; the event itself is discarded.
    pub fn submit(&self, raw: &RawEvent) -> Result<Admission, SyncError> {
        if !self.ctx.store.analytics_enabled()? {
            tracing::debug!("analytics disabled; event dropped");
            return Ok(Admission::Disabled);
        }
        let admission = self.gate.admit(raw);
        match &admission {
            Admission::Admitted(record) => {
                self.ctx.store.enqueue(record)?;
                tracing::debug!(category = %record.category, "event admitted");
            }
            Admission::Rejected(reason) => {
                self.ctx.store.bump_rejection(&reason.code())?;
                tracing::info!(reason = %reason.code(), "event rejected");
            }
            Admission::Disabled => {}
        }
        Ok(admission)
    }

    fn lease_ttl_ms(&self) -> i64 {
        self.ctx.config.coordinator.lease_ttl_secs as i64 * SECOND_MS
    }

    fn hold_lease(&self, now: i64) -> Result<(), SyncError> {
        match self
            .ctx
            .store
            .acquire_lease(&self.owner, now, self.lease_ttl_ms())?
        {
            Ok(_) => Ok(()),
            Err(held) => Err(SyncError::CoordinatorBusy(held.owner)),
        }
    }

    /// Take the coordinator lease and recover orphaned batches. Returns how many were
    /// recovered.
    pub fn start(&self) -> Result<usize, SyncError> {
        self.hold_lease(self.ctx.now())?;
        self.recover_orphans()
    }

    /// Release the lease so the next process can recover immediately.
    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.ctx.store.release_lease(&self.owner)
    }

    /// Treat every `in_flight` batch as a failed attempt.
    ///
    /// Only valid while this coordinator holds the lease, since then no other process can
    /// be mid-transmission. Recovered batches wait out normal backoff.
    pub fn recover_orphans(&self) -> Result<usize, SyncError> {
        let now = self.ctx.now();
        self.hold_lease(now)?;
        self.settle_orphans(now)
    }

    /// Caller must hold the lease.
    fn settle_orphans(&self, now: i64) -> Result<usize, SyncError> {
        let orphans = self.ctx.store.batches_with_status(BatchStatus::InFlight)?;
        let interrupted = TransportError::Transient("transmission interrupted".to_string());
        for batch in &orphans {
            let outcome = self.retry.outcome_for_failure(batch, &interrupted, now);
            self.ctx.store.fail_batch(&batch.batch_id, outcome)?;
            tracing::warn!(
                batch_id = %batch.batch_id,
                attempts = batch.attempts,
                terminal = matches!(outcome, FailureOutcome::Terminal),
                "recovered orphaned batch"
            );
        }
        Ok(orphans.len())
    }

    pub fn next_cycle_delay(&self, strategy: SyncStrategy) -> Duration {
        Duration::from_secs(self.ctx.config.coordinator.cycle_period_secs.get(strategy))
    }

    /// What the OS scheduler should require before running the next cycle.
    pub fn scheduler_constraints(&self) -> SchedulerConstraints {
        self.monitor
            .last_observation()
            .map(|(_, strategy)| strategy)
            .unwrap_or(SyncStrategy::Disabled)
            .constraints()
    }

    /// Push a connectivity or capability change observed by the platform. The next cycle
    /// uses it unless the probe has a newer reading.
    pub fn on_network_event(&self, state: NetworkState) -> SyncStrategy {
        self.monitor.on_event(state).1
    }

    /// One scheduled cycle. Storage failures are recorded for health reporting and
    /// returned; nothing has been half-applied since each step is its own transaction.
    pub fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        match self.cycle() {
            Ok(report) => {
                self.clear_cycle_error()?;
                tracing::info!(
                    strategy = %report.strategy,
                    planned = report.planned,
                    succeeded = report.succeeded,
                    failed_retryable = report.failed_retryable,
                    failed_terminal = report.failed_terminal,
                    deferred = report.deferred,
                    next_cycle_secs = report.next_cycle_secs,
                    "sync cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                if e.is_storage() {
                    if let Err(meta_err) = self
                        .ctx
                        .store
                        .meta_set(schemas::META_LAST_CYCLE_ERROR, "storage")
                    {
                        tracing::debug!(error = %meta_err, "could not record cycle error");
                    }
                }
                tracing::warn!(error = %e, "sync cycle failed");
                Err(e)
            }
        }
    }

    /// Forced sync. Skips the period wait only; a disabled strategy still does nothing.
    pub fn sync_now(&self) -> Result<CycleReport, SyncError> {
        tracing::info!("forced sync requested");
        self.run_cycle()
    }

    fn cycle(&self) -> Result<CycleReport, SyncError> {
        self.ctx.cancel.check()?;
        let now = self.ctx.now();
        self.hold_lease(now)?;
        // Cycles never overlap under the lease, so anything still in flight was stranded
        // by a cycle that failed while settling it.
        let recovered = self.settle_orphans(now)?;

        let (state, strategy) = self.monitor.refresh();
        let next_cycle_secs = self.next_cycle_delay(strategy).as_secs();
        let enabled = self.ctx.store.analytics_enabled()?;
        let mut report = CycleReport::idle(strategy, enabled, next_cycle_secs);
        report.recovered = recovered;
        if !enabled {
            return Ok(report);
        }

        if strategy.allows_activity() {
            report.planned = self.planner.plan(&self.ctx.store, strategy, &state, now)?.len();
            self.ctx.cancel.check()?;

            let released = self.retry.release_due(&self.ctx.store, now)?;
            report.released = released.released;
            report.exhausted = released.exhausted;

            for batch in self.ctx.store.batches_with_status(BatchStatus::Pending)? {
                self.ctx.cancel.check()?;
                let outcome = self.transmit_batch(&batch, &state)?;
                report.count(outcome);
            }
        }

        self.ctx.cancel.check()?;
        report.purged = self.maybe_purge(self.ctx.now())?;
        Ok(report)
    }

    /// Send one pending batch and settle its status.
    pub fn transmit_batch(
        &self,
        batch: &SyncBatch,
        state: &NetworkState,
    ) -> Result<BatchOutcome, SyncError> {
        if batch.requires_unmetered_network && state.metered {
            return Ok(BatchOutcome::Deferred);
        }
        let now = self.ctx.now();
        let in_flight = self.ctx.store.begin_transmission(&batch.batch_id, now)?;
        let records = self.ctx.store.records_by_ids(&in_flight.record_ids)?;
        let payload = BatchPayload::new(&in_flight, records);

        match self.transport.transmit(&payload) {
            Ok(ack) => {
                let rejected = ack.rejected_ids();
                self.ctx.store.complete_batch(&in_flight.batch_id, &rejected)?;
                self.ctx
                    .store
                    .meta_set(schemas::META_LAST_SYNC_AT, &self.ctx.now().to_string())?;
                tracing::info!(
                    batch_id = %in_flight.batch_id,
                    records = in_flight.record_ids.len(),
                    rejected = rejected.len(),
                    attempt = in_flight.attempts,
                    "batch delivered"
                );
                Ok(BatchOutcome::Succeeded)
            }
            Err(err) => {
                let outcome = self
                    .retry
                    .outcome_for_failure(&in_flight, &err, self.ctx.now());
                self.ctx.store.fail_batch(&in_flight.batch_id, outcome)?;
                tracing::warn!(
                    batch_id = %in_flight.batch_id,
                    attempt = in_flight.attempts,
                    max_retries = in_flight.max_retries,
                    error = %err,
                    "batch transmission failed"
                );
                Ok(match outcome {
                    FailureOutcome::Retryable { .. } => BatchOutcome::FailedRetryable,
                    FailureOutcome::Terminal => BatchOutcome::FailedTerminal,
                })
            }
        }
    }

    /// Purge terminal records past retention, at most once per purge interval.
    pub fn maybe_purge(&self, now: i64) -> Result<Option<PurgeReport>, SyncError> {
        let cfg = &self.ctx.config.coordinator;
        let interval_ms = cfg.purge_interval_secs as i64 * SECOND_MS;
        if let Some(last) = self.ctx.store.meta_get_i64(schemas::META_LAST_PURGE_AT)? {
            if now - last < interval_ms {
                return Ok(None);
            }
        }
        let cutoff = now - cfg.retention_days as i64 * DAY_MS;
        let report = self
            .ctx
            .store
            .purge_older_than(cutoff, &[SyncState::Synced, SyncState::Failed])?;
        self.ctx
            .store
            .meta_set(schemas::META_LAST_PURGE_AT, &now.to_string())?;
        tracing::info!(
            records = report.records,
            batches = report.batches,
            "purged expired analytics"
        );
        Ok(Some(report))
    }

    /// Switch analytics on or off. Turning it off wipes all local analytics data.
    pub fn set_analytics_enabled(&self, enabled: bool) -> Result<Option<PurgeReport>, SyncError> {
        self.ctx.store.set_analytics_enabled(enabled)?;
        if enabled {
            tracing::info!("analytics enabled");
            return Ok(None);
        }
        let report = self.ctx.store.purge_all()?;
        tracing::info!(
            records = report.records,
            batches = report.batches,
            "analytics disabled; local data purged"
        );
        Ok(Some(report))
    }

    pub fn health(&self) -> Result<HealthReport, SyncError> {
        health::report(&self.ctx.store, &self.ctx.config.health, self.ctx.now())
    }

    /// Run cycles until cancelled or `max_cycles` have run, sleeping the strategy's period
    /// in between. Failed cycles are logged and retried on the next tick.
    pub fn run(&self, max_cycles: Option<u64>) -> Result<u64, SyncError> {
        self.start()?;
        let mut cycles = 0u64;
        while !self.ctx.cancel.is_cancelled() {
            let delay = match self.run_cycle() {
                Ok(report) => Duration::from_secs(report.next_cycle_secs),
                Err(SyncError::Cancelled) => break,
                Err(e @ SyncError::CoordinatorBusy(_)) => return Err(e),
                Err(_) => self.next_cycle_delay(SyncStrategy::Disabled),
            };
            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            self.sleep_cancellable(delay);
        }
        self.shutdown()?;
        Ok(cycles)
    }

    fn sleep_cancellable(&self, delay: Duration) {
        let mut remaining = delay;
        let slice = Duration::from_millis(SLEEP_SLICE_MS);
        while !remaining.is_zero() && !self.ctx.cancel.is_cancelled() {
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }

    fn clear_cycle_error(&self) -> Result<(), SyncError> {
        let recorded = self.ctx.store.meta_get(schemas::META_LAST_CYCLE_ERROR)?;
        if recorded.is_some_and(|e| !e.is_empty()) {
            self.ctx.store.meta_set(schemas::META_LAST_CYCLE_ERROR, "")?;
        }
        Ok(())
    }
}
