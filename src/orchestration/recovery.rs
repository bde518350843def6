//! Startup recovery for runs and work items abandoned by a crash.
//!
//! Runs once at process startup, after a configurable grace period. Finds
//! orchestration runs left non-terminal longer than the grace period and
//! either resumes them from their recorded phase or force-finalizes them
//! with a recovery note, freeing the concurrency guard. Also sweeps stale
//! work items independently of any run, covering crashes that happened
//! before a run's own cleanup phase.
//!
//! Recovery trouble degrades to "treat as not running": every sub-step logs
//! and continues rather than blocking subsequent runs.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::cleanup::StaleItemFinalizer;
use super::pipeline::{OrchestrationPipeline, RunOutcome};
use crate::config::{OrchestrationConfig, RecoveryConfig};
use crate::constants::events::RUN_RECOVERED;
use crate::events::EventPublisher;
use crate::models::OrchestrationRun;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub runs_resumed: usize,
    pub runs_failed: usize,
    pub stale_items_finalized: u64,
}

pub struct RecoveryService {
    pool: PgPool,
    pipeline: OrchestrationPipeline,
    events: EventPublisher,
    recovery: RecoveryConfig,
    orchestration: OrchestrationConfig,
}

impl RecoveryService {
    pub fn new(
        pool: PgPool,
        pipeline: OrchestrationPipeline,
        events: EventPublisher,
        recovery: RecoveryConfig,
        orchestration: OrchestrationConfig,
    ) -> Self {
        Self {
            pool,
            pipeline,
            events,
            recovery,
            orchestration,
        }
    }

    /// Wait out the grace period, then recover. Intended to be spawned once
    /// from bootstrap.
    pub async fn run_at_startup(&self) -> RecoveryReport {
        let grace = Duration::from_secs(self.recovery.grace_period_seconds.max(0) as u64);
        info!(grace_seconds = grace.as_secs(), "recovery waiting out grace period");
        tokio::time::sleep(grace).await;
        self.recover().await
    }

    /// One recovery pass over stuck runs and stale items.
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let cutoff = Utc::now() - chrono::Duration::seconds(self.recovery.grace_period_seconds);

        let stuck = match OrchestrationRun::find_stuck(&self.pool, cutoff).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "stuck-run query failed; treating as none running");
                Vec::new()
            }
        };

        for run in stuck {
            if self.recovery.resume_interrupted {
                info!(
                    run_id = run.run_id,
                    correlation_id = %run.correlation_id,
                    phase = %run.current_phase,
                    "recovery resuming interrupted run"
                );
                let outcome = self.pipeline.resume(run.clone()).await;
                match outcome {
                    RunOutcome::Completed { .. } => report.runs_resumed += 1,
                    _ => report.runs_failed += 1,
                }
                self.publish_recovered(&run, "resumed");
            } else {
                let note = format!(
                    "finalized by startup recovery: run exceeded the {}s grace period in phase {}",
                    self.recovery.grace_period_seconds, run.current_phase
                );
                match OrchestrationRun::fail(&self.pool, run.run_id, &note).await {
                    Ok(_) => {
                        info!(
                            run_id = run.run_id,
                            correlation_id = %run.correlation_id,
                            "recovery force-finalized stuck run"
                        );
                        report.runs_failed += 1;
                        self.publish_recovered(&run, "force_failed");
                    }
                    Err(e) => {
                        error!(run_id = run.run_id, error = %e, "recovery could not finalize run");
                    }
                }
            }
        }

        // Stale-item sweep runs regardless of run recovery, covering items
        // abandoned before any cleanup phase executed.
        let finalizer =
            StaleItemFinalizer::new(self.pool.clone(), self.orchestration.processing_window_hours);
        match finalizer.sweep().await {
            Ok(count) => report.stale_items_finalized = count,
            Err(e) => warn!(error = %e, "stale-item sweep failed during recovery"),
        }

        info!(
            runs_resumed = report.runs_resumed,
            runs_failed = report.runs_failed,
            stale_items_finalized = report.stale_items_finalized,
            "recovery pass complete"
        );
        report
    }

    fn publish_recovered(&self, run: &OrchestrationRun, action: &str) {
        self.events.publish(
            RUN_RECOVERED,
            serde_json::json!({
                "run_id": run.run_id,
                "correlation_id": run.correlation_id.to_string(),
                "phase": run.current_phase,
                "action": action,
            }),
        );
    }
}
