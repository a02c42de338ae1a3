//! Reconciliation Worker
//!
//! Background task that fires the timer-driven transitions: auto-confirming
//! `completed` purchases past their deadline and escalating unattended
//! disputes to the platform. Runs once at start, then on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::coordinator::PurchaseCoordinator;
use super::error::PurchaseError;
use super::machine::PurchaseEvent;
use super::types::PurchaseId;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Maximum candidates fetched per query per sweep
    pub batch_size: usize,
    /// Candidates processed concurrently within a sweep
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            batch_size: 100,
            concurrency: 1,
        }
    }
}

/// Per-sweep counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub auto_confirmed: usize,
    pub escalated: usize,
    /// Candidates whose guard no longer held on re-read
    pub skipped: usize,
    /// Candidates another writer changed between re-read and write
    pub lost_races: usize,
    pub failed: usize,
    pub side_effect_failures: usize,
}

impl SweepSummary {
    pub fn transitions(&self) -> usize {
        self.auto_confirmed + self.escalated
    }

    fn merge(&mut self, other: &SweepSummary) {
        self.auto_confirmed += other.auto_confirmed;
        self.escalated += other.escalated;
        self.skipped += other.skipped;
        self.lost_races += other.lost_races;
        self.failed += other.failed;
        self.side_effect_failures += other.side_effect_failures;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    AutoConfirm,
    Escalation,
}

impl Timer {
    fn event(self) -> PurchaseEvent {
        match self {
            Timer::AutoConfirm => PurchaseEvent::AutoConfirmDue,
            Timer::Escalation => PurchaseEvent::PlatformInterventionDue,
        }
    }
}

enum CandidateResult {
    Advanced { side_effect_failures: usize },
    Skipped,
    LostRace,
    Failed,
}

/// Reconciliation Worker
pub struct ReconciliationWorker {
    coordinator: Arc<PurchaseCoordinator>,
    config: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(coordinator: Arc<PurchaseCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(coordinator: Arc<PurchaseCoordinator>) -> Self {
        Self::new(coordinator, WorkerConfig::default())
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run sweeps until `shutdown` flips to true or its sender is dropped.
    /// A sweep in progress always finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Starting reconciliation worker"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                // first tick completes immediately
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// Run a single sweep at the coordinator's current time
    pub async fn run_cycle(&self) -> Result<SweepSummary, PurchaseError> {
        self.run_cycle_at(self.coordinator.now()).await
    }

    /// Run a single sweep as of `now`. Candidates are fetched in batches of
    /// `batch_size` until both queries come back short, so one sweep drains
    /// every purchase that is due. A batch that advances nothing ends the
    /// sweep; its rows would only be fetched again.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<SweepSummary, PurchaseError> {
        let batch_size = self.config.batch_size.max(1);
        let mut summary = SweepSummary::default();
        let mut batches = 0usize;
        let mut confirm_open = true;
        let mut escalate_open = true;

        loop {
            let store = self.coordinator.store();
            let due_confirm = if confirm_open {
                store.find_due_auto_confirm(now, batch_size).await?
            } else {
                Vec::new()
            };
            let due_escalate = if escalate_open {
                store.find_due_escalation(now, batch_size).await?
            } else {
                Vec::new()
            };

            if due_confirm.is_empty() && due_escalate.is_empty() {
                if batches == 0 {
                    debug!("No due purchases found");
                }
                break;
            }
            batches += 1;

            info!(
                batch = batches,
                auto_confirm = due_confirm.len(),
                escalation = due_escalate.len(),
                "Found due purchases"
            );

            // a short batch means that query is drained
            confirm_open = due_confirm.len() >= batch_size;
            escalate_open = due_escalate.len() >= batch_size;
            let candidates: Vec<(PurchaseId, Timer)> = due_confirm
                .iter()
                .map(|p| (p.id, Timer::AutoConfirm))
                .chain(due_escalate.iter().map(|p| (p.id, Timer::Escalation)))
                .collect();

            let batch = self.process_batch(candidates, now).await;
            summary.merge(&batch);

            if !confirm_open && !escalate_open {
                break;
            }
            // only failed rows are still due; fetching again returns the same batch
            if batch.transitions() + batch.skipped + batch.lost_races == 0 {
                warn!(
                    failed = batch.failed,
                    "Due purchases keep failing, ending sweep early"
                );
                break;
            }
        }

        if batches > 0 {
            info!(
                batches,
                auto_confirmed = summary.auto_confirmed,
                escalated = summary.escalated,
                skipped = summary.skipped,
                lost_races = summary.lost_races,
                failed = summary.failed,
                side_effect_failures = summary.side_effect_failures,
                "Reconciliation sweep finished"
            );
        }

        Ok(summary)
    }

    async fn process_batch(
        &self,
        candidates: Vec<(PurchaseId, Timer)>,
        now: DateTime<Utc>,
    ) -> SweepSummary {
        let results: Vec<(Timer, CandidateResult)> = stream::iter(candidates)
            .map(|(id, timer)| async move { (timer, self.process(id, timer, now).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = SweepSummary::default();
        for (timer, result) in results {
            match result {
                CandidateResult::Advanced {
                    side_effect_failures,
                } => {
                    match timer {
                        Timer::AutoConfirm => summary.auto_confirmed += 1,
                        Timer::Escalation => summary.escalated += 1,
                    }
                    summary.side_effect_failures += side_effect_failures;
                }
                CandidateResult::Skipped => summary.skipped += 1,
                CandidateResult::LostRace => summary.lost_races += 1,
                CandidateResult::Failed => summary.failed += 1,
            }
        }
        summary
    }

    async fn process(&self, id: PurchaseId, timer: Timer, now: DateTime<Utc>) -> CandidateResult {
        match self.coordinator.advance_due(id, timer.event(), now).await {
            Ok(outcome) => CandidateResult::Advanced {
                side_effect_failures: outcome.side_effect_failures.len(),
            },
            Err(PurchaseError::InvalidTransition(rejected)) => {
                info!(
                    purchase_id = %id,
                    reason = %rejected,
                    "Skipping candidate, guard no longer holds"
                );
                CandidateResult::Skipped
            }
            Err(PurchaseError::ConcurrentModification(_)) => {
                warn!(purchase_id = %id, "Candidate changed during sweep");
                CandidateResult::LostRace
            }
            Err(e) => {
                error!(
                    purchase_id = %id,
                    error = %e,
                    "Failed to reconcile purchase"
                );
                CandidateResult::Failed
            }
        }
    }
}
