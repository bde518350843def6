//! The multi-phase orchestration pipeline.
//!
//! Phases run strictly in order under one run row; admission goes through
//! the concurrency guard, progress counters are mirrored into the row, and
//! every failure path releases the guard slot so the next run can be
//! admitted. A phase failure fails the run; a per-item failure inside a
//! phase does not.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::call_processor::CallProcessor;
use super::cleanup::StaleItemFinalizer;
use super::credential_verifier::CredentialVerifier;
use super::guard::{Admission, ConcurrencyGuard, GuardError};
use super::status_checker::StatusChecker;
use super::sync_accounts::AccountSynchronizer;
use super::work_item_seeder::WorkItemSeeder;
use super::worker_pool::PoolProgress;
use crate::clients::{ClientError, ProviderClient};
use crate::config::OrchestrationConfig;
use crate::events::EventPublisher;
use crate::ledger::ExecutionLedger;
use crate::models::OrchestrationRun;
use crate::services::notifications::{NotificationSink, RunSummary};
use crate::state_machine::{OrchestrationPhase, RunState};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("admission failed: {0}")]
    Admission(#[from] GuardError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors escaping a whole phase (not a single item).
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("provider error: {0}")]
    Provider(#[from] ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Drive the run to completion before returning.
    Synchronous,
    /// Spawn the run and return its correlation id immediately.
    Background,
}

/// Caller-visible result of a run request. Failure carries only the
/// correlation id — operators correlate to logs with it; raw errors and
/// stack traces stay in logs and notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { correlation_id: Uuid },
    Failed { correlation_id: Uuid },
    Cancelled { correlation_id: Uuid },
    Queued { correlation_id: Uuid },
    /// Rejected: another run is in flight.
    AlreadyRunning { correlation_id: Option<Uuid> },
}

/// Mirror pool progress into the run row while a bounded phase executes.
pub(crate) fn spawn_progress_mirror(
    pool: PgPool,
    run_id: i64,
    mut progress: watch::Receiver<PoolProgress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow();
            if let Err(e) = OrchestrationRun::set_progress(
                &pool,
                run_id,
                current.processed.min(i32::MAX as usize) as i32,
                current.total.min(i32::MAX as usize) as i32,
            )
            .await
            {
                warn!(run_id, error = %e, "progress mirror update failed");
            }
        }
    })
}

struct PipelineInner {
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    guard: Arc<ConcurrencyGuard>,
    ledger: ExecutionLedger,
    events: EventPublisher,
    notifier: Arc<dyn NotificationSink>,
    config: OrchestrationConfig,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct OrchestrationPipeline {
    inner: Arc<PipelineInner>,
}

impl OrchestrationPipeline {
    pub fn new(
        pool: PgPool,
        client: Arc<dyn ProviderClient>,
        guard: Arc<ConcurrencyGuard>,
        events: EventPublisher,
        notifier: Arc<dyn NotificationSink>,
        config: OrchestrationConfig,
    ) -> Self {
        let ledger = ExecutionLedger::new(pool.clone());
        Self {
            inner: Arc::new(PipelineInner {
                pool,
                client,
                guard,
                ledger,
                events,
                notifier,
                config,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Operator-requested abort: workers stop pulling items, the run is
    /// finalized `Cancelled` at the next phase boundary.
    pub fn request_abort(&self) {
        self.inner.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Request a run. A second request while one is active is rejected (not
    /// queued) and returns the in-flight run's correlation id.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome, PipelineError> {
        let run = match self.inner.guard.try_admit().await? {
            Admission::Admitted(run) => run,
            Admission::Rejected {
                active_correlation_id,
            } => {
                info!(?active_correlation_id, "orchestration request rejected; run already active");
                return Ok(RunOutcome::AlreadyRunning {
                    correlation_id: active_correlation_id,
                });
            }
        };

        let correlation_id = run.correlation_id;
        self.inner.events.publish(
            crate::constants::events::RUN_QUEUED,
            serde_json::json!({
                "run_id": run.run_id,
                "correlation_id": correlation_id.to_string(),
            }),
        );

        match mode {
            RunMode::Synchronous => Ok(self.drive(run).await),
            RunMode::Background => {
                let pipeline = self.clone();
                tokio::spawn(async move {
                    pipeline.drive(run).await;
                });
                Ok(RunOutcome::Queued { correlation_id })
            }
        }
    }

    /// Resume an interrupted run from its recorded phase. Used by startup
    /// recovery; the guard slot is re-occupied first.
    pub async fn resume(&self, run: OrchestrationRun) -> RunOutcome {
        info!(
            run_id = run.run_id,
            phase = %run.current_phase,
            "resuming interrupted orchestration run"
        );
        self.inner.guard.occupy(run.run_id).await;
        self.drive(run).await
    }

    async fn drive(&self, run: OrchestrationRun) -> RunOutcome {
        let correlation_id = run.correlation_id;
        match self.drive_inner(&run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = run.run_id, error = %e, "orchestration run aborted on internal error");
                let note = format!("internal error: {e}");
                if let Err(db_err) = OrchestrationRun::fail(&self.inner.pool, run.run_id, &note).await
                {
                    error!(run_id = run.run_id, error = %db_err, "could not finalize failed run");
                }
                self.finish(run.run_id, RunState::Failed).await;
                RunOutcome::Failed { correlation_id }
            }
        }
    }

    async fn drive_inner(&self, run: &OrchestrationRun) -> Result<RunOutcome, PipelineError> {
        let correlation_id = run.correlation_id;
        let start_phase = run
            .phase()
            .unwrap_or(OrchestrationPhase::SyncAccounts);

        for phase in start_phase.remaining() {
            if self.inner.cancel.is_cancelled() {
                OrchestrationRun::cancel(&self.inner.pool, run.run_id, "aborted by operator")
                    .await?;
                self.finish(run.run_id, RunState::Cancelled).await;
                return Ok(RunOutcome::Cancelled { correlation_id });
            }

            OrchestrationRun::advance_phase(&self.inner.pool, run.run_id, phase).await?;
            self.inner.events.run_phase_changed(run.run_id, phase);
            info!(run_id = run.run_id, %phase, "orchestration phase starting");

            if let Err(e) = self.execute_phase(phase, run).await {
                error!(run_id = run.run_id, %phase, error = %e, "orchestration phase failed");
                let note = format!("phase {phase} failed: {e}");
                OrchestrationRun::fail(&self.inner.pool, run.run_id, &note).await?;
                self.finish(run.run_id, RunState::Failed).await;
                return Ok(RunOutcome::Failed { correlation_id });
            }
        }

        OrchestrationRun::complete(&self.inner.pool, run.run_id).await?;
        self.finish(run.run_id, RunState::Completed).await;
        Ok(RunOutcome::Completed { correlation_id })
    }

    async fn execute_phase(
        &self,
        phase: OrchestrationPhase,
        run: &OrchestrationRun,
    ) -> Result<(), PhaseError> {
        let inner = &self.inner;
        match phase {
            OrchestrationPhase::SyncAccounts => {
                AccountSynchronizer::new(
                    inner.pool.clone(),
                    Arc::clone(&inner.client),
                    inner.config.sync_page_size,
                )
                .run(run)
                .await?;
            }
            OrchestrationPhase::CreateWorkItems => {
                WorkItemSeeder::new(inner.pool.clone(), inner.config.due_soon_days_before_end)
                    .run(run)
                    .await?;
            }
            OrchestrationPhase::VerifyCredentials => {
                CredentialVerifier::new(
                    inner.pool.clone(),
                    Arc::clone(&inner.client),
                    inner.ledger.clone(),
                    inner.config.worker_count,
                )
                .run(run, &inner.cancel)
                .await?;
            }
            OrchestrationPhase::ProcessCalls => {
                CallProcessor::new(
                    inner.pool.clone(),
                    Arc::clone(&inner.client),
                    inner.ledger.clone(),
                    inner.config.worker_count,
                )
                .run(run, &inner.cancel)
                .await?;
            }
            OrchestrationPhase::CheckStatuses => {
                StatusChecker::new(
                    inner.pool.clone(),
                    Arc::clone(&inner.client),
                    inner.ledger.clone(),
                    inner.config.worker_count,
                )
                .run(run, &inner.cancel)
                .await?;
            }
            OrchestrationPhase::Cleanup => {
                StaleItemFinalizer::new(inner.pool.clone(), inner.config.processing_window_hours)
                    .run(run)
                    .await?;
            }
        }
        Ok(())
    }

    /// Common tail for every terminal path: release the guard slot, emit the
    /// run-finished event, and send the summary notification.
    async fn finish(&self, run_id: i64, state: RunState) {
        self.inner.guard.release(run_id).await;
        self.inner.events.run_finished(run_id, state);

        match OrchestrationRun::find_by_id(&self.inner.pool, run_id).await {
            Ok(Some(run)) => {
                let summary = RunSummary {
                    run_id: run.run_id,
                    correlation_id: run.correlation_id,
                    state: run.state.clone(),
                    processed_items: run.processed_items,
                    total_items: run.total_items,
                    warning: run.warning.clone(),
                    failure_note: run.failure_note.clone(),
                };
                self.inner.notifier.notify_run_summary(&summary).await;
            }
            Ok(None) => warn!(run_id, "finished run row not found for summary"),
            Err(e) => warn!(run_id, error = %e, "could not load run for summary"),
        }
    }
}
