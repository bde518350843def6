//! Phase 6: finalize work items stuck past their processing window.
//!
//! Items abandoned in `Pending` or `CredentialCheckInProgress` are marked
//! `NeedsReview` rather than left perpetually in-flight. The same sweep runs
//! from startup recovery, independent of any orchestration run, to cover
//! crashes that happened before a run's own cleanup phase.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::info;

use super::pipeline::PhaseError;
use crate::models::{OrchestrationRun, WorkItem};

pub struct StaleItemFinalizer {
    pool: PgPool,
    processing_window_hours: i64,
}

impl StaleItemFinalizer {
    pub fn new(pool: PgPool, processing_window_hours: i64) -> Self {
        Self {
            pool,
            processing_window_hours,
        }
    }

    /// The bare sweep, also invoked by recovery.
    pub async fn sweep(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - Duration::hours(self.processing_window_hours);
        let finalized = WorkItem::finalize_stale(&self.pool, cutoff).await?;
        if finalized > 0 {
            info!(finalized, "stale work items finalized for review");
        }
        Ok(finalized)
    }

    pub async fn run(&self, run: &OrchestrationRun) -> Result<u64, PhaseError> {
        let finalized = self.sweep().await?;
        let count = finalized.min(i32::MAX as u64) as i32;
        OrchestrationRun::set_progress(&self.pool, run.run_id, count, count).await?;
        Ok(finalized)
    }
}
