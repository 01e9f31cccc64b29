//! Moderation sweep
//!
//! Resolves Pending content older than the pending age threshold: flagged
//! items are rejected, clean items approved, both attributed to the system
//! actor. The flag bit is read by the resolving write itself, so a
//! re-moderation landing between listing and resolving is honored.
//!
//! Items are independent; one failing item is logged and counted but never
//! stops the rest of the batch. An item that fails sits out the next
//! [`FAILED_ITEM_SKIP_RUNS`] runs so a handful of poison rows cannot occupy
//! every batch.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::ModerationConfig;
use crate::db::ContentStore;
use crate::error::{AppError, Result};
use crate::metrics::moderation as metrics;
use crate::models::{Actor, ModerationStatus, TargetRef};
use crate::services::{ModerationService, ResolveOutcome};

/// Runs a failed item sits out before it is attempted again.
pub const FAILED_ITEM_SKIP_RUNS: u64 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub approved: usize,
    pub rejected: usize,
    /// Items left for a later run: errors and rows that vanished mid-sweep.
    pub failed: usize,
    /// Aged items skipped this run because they failed recently.
    pub deferred: usize,
}

impl SweepReport {
    fn count(&mut self, status: ModerationStatus) {
        match status {
            ModerationStatus::Approved => self.approved += 1,
            ModerationStatus::Rejected => self.rejected += 1,
            ModerationStatus::Pending => self.failed += 1,
        }
    }
}

pub struct ModerationSweep {
    content: Arc<dyn ContentStore>,
    moderation: Arc<ModerationService>,
    max_age: Duration,
    batch_size: i64,
    runs: AtomicU64,
    /// Failed items and the run number from which they are retried.
    retry_from: Mutex<HashMap<TargetRef, u64>>,
}

impl ModerationSweep {
    pub fn new(
        content: Arc<dyn ContentStore>,
        moderation: Arc<ModerationService>,
        max_age: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            content,
            moderation,
            max_age,
            batch_size,
            runs: AtomicU64::new(0),
            retry_from: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        content: Arc<dyn ContentStore>,
        moderation: Arc<ModerationService>,
        config: &ModerationConfig,
    ) -> Self {
        Self::new(
            content,
            moderation,
            config.pending_max_age,
            config.sweep_batch_size,
        )
    }

    fn failed_items(&self) -> MutexGuard<'_, HashMap<TargetRef, u64>> {
        self.retry_from
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// One pass over aged Pending content.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let max_age = chrono::Duration::from_std(self.max_age)
            .map_err(|e| AppError::Config(format!("pending max age out of range: {}", e)))?;
        let cutoff = Utc::now() - max_age;
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;

        let cooling = {
            let mut retry_from = self.failed_items();
            retry_from.retain(|_, from| *from > run);
            retry_from.len() as i64
        };

        // Over-fetch by the number of cooling items so they never take a
        // slot from retryable content.
        let listed = self
            .content
            .list_pending_created_before(cutoff, self.batch_size.saturating_add(cooling))
            .await?;

        if listed.is_empty() {
            info!(cutoff = %cutoff, "No pending content past threshold, nothing to resolve");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();
        let mut batch = Vec::with_capacity(listed.len());
        {
            let retry_from = self.failed_items();
            for item in listed {
                if retry_from.contains_key(&item.target) {
                    report.deferred += 1;
                } else if (batch.len() as i64) < self.batch_size {
                    batch.push(item);
                }
            }
        }
        report.examined = batch.len();

        if batch.is_empty() {
            info!(
                cutoff = %cutoff,
                deferred = report.deferred,
                "Only recently failed content past threshold, skipping this run"
            );
            return Ok(report);
        }

        for item in batch {
            let target = item.target;

            match self.moderation.resolve_by_flag(target, Actor::System).await {
                Ok(ResolveOutcome::Resolved(status)) => {
                    report.count(status);
                    info!(
                        target_kind = %target.kind,
                        target_id = %target.id,
                        outcome = %status,
                        "Sweep resolved pending content"
                    );
                }
                Ok(ResolveOutcome::AlreadyResolved(status)) => {
                    // Resolved by a moderator between listing and now.
                    report.count(status);
                    info!(
                        target_kind = %target.kind,
                        target_id = %target.id,
                        outcome = %status,
                        "Pending content already resolved"
                    );
                }
                Ok(ResolveOutcome::NotFound) => {
                    report.failed += 1;
                    warn!(
                        target_kind = %target.kind,
                        target_id = %target.id,
                        "Pending content disappeared during sweep"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    let retry_at = run + FAILED_ITEM_SKIP_RUNS + 1;
                    self.failed_items().insert(target, retry_at);
                    error!(
                        target_kind = %target.kind,
                        target_id = %target.id,
                        error = %e,
                        skip_runs = FAILED_ITEM_SKIP_RUNS,
                        "Failed to resolve pending content, will retry in a later sweep"
                    );
                }
            }
        }

        metrics::record_sweep_items("approved", report.approved as u64);
        metrics::record_sweep_items("rejected", report.rejected as u64);
        metrics::record_sweep_items("failed", report.failed as u64);
        metrics::record_sweep_items("deferred", report.deferred as u64);

        Ok(report)
    }
}

/// Run the sweep on a fixed cadence until `shutdown` fires.
///
/// The first tick fires immediately, so a restart catches up without waiting
/// a whole interval.
pub async fn start_moderation_sweep(
    sweep: Arc<ModerationSweep>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if every.is_zero() {
        warn!("Zero moderation sweep interval, falling back to one second");
    }
    let every = every.max(Duration::from_secs(1));
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_secs = every.as_secs(),
        max_age_secs = sweep.max_age.as_secs(),
        batch_size = sweep.batch_size,
        "Starting moderation sweep"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cycle_start = Instant::now();
                match sweep.run_once().await {
                    Ok(report) => {
                        metrics::record_sweep_run("success", cycle_start.elapsed());
                        if report.examined > 0 {
                            info!(
                                examined = report.examined,
                                approved = report.approved,
                                rejected = report.rejected,
                                failed = report.failed,
                                deferred = report.deferred,
                                duration_ms = cycle_start.elapsed().as_millis() as u64,
                                "Moderation sweep completed"
                            );
                        }
                    }
                    Err(e) => {
                        metrics::record_sweep_run("error", cycle_start.elapsed());
                        error!(
                            error = %e,
                            duration_ms = cycle_start.elapsed().as_millis() as u64,
                            "Moderation sweep failed, will retry next interval"
                        );
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Received shutdown signal, stopping moderation sweep");
                break;
            }
        }
    }

    info!("Moderation sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_each_status_on_its_own() {
        let mut report = SweepReport::default();
        report.count(ModerationStatus::Approved);
        report.count(ModerationStatus::Rejected);
        report.count(ModerationStatus::Rejected);
        report.count(ModerationStatus::Pending);

        assert_eq!(report.approved, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.failed, 1);
    }
}
