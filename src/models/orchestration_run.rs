use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::state_machine::{OrchestrationPhase, RunState};

/// One end-to-end pipeline execution with durable progress tracking.
/// Maps to the `billrun_orchestration_runs` table.
///
/// Invariant: at most one row is non-terminal at any time. The concurrency
/// guard checks this table at admission and the recovery service finalizes
/// rows a crash left behind, so the invariant holds across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrchestrationRun {
    pub run_id: i64,
    /// Returned to the caller who queued the run; also what a rejected
    /// caller receives to identify the in-flight run.
    pub correlation_id: Uuid,
    pub current_phase: String,
    pub processed_items: i32,
    pub total_items: i32,
    pub state: String,
    /// Non-fatal anomalies, e.g. a skipped deletion sweep.
    pub warning: Option<String>,
    /// Set when the run is finalized as failed, including by recovery.
    pub failure_note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "run_id, correlation_id, current_phase, processed_items, total_items, \
     state, warning, failure_note, started_at, finished_at, created_at, updated_at";

impl OrchestrationRun {
    pub async fn create(pool: &PgPool) -> Result<OrchestrationRun, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_orchestration_runs \
             (correlation_id, current_phase, state, started_at) \
             VALUES ($1, $2, 'running', NOW()) \
             RETURNING {RUN_COLUMNS}"
        );
        sqlx::query_as::<_, OrchestrationRun>(&sql)
            .bind(Uuid::new_v4())
            .bind(OrchestrationPhase::SyncAccounts.to_string())
            .fetch_one(pool)
            .await
    }

    /// The durable side of the single-run invariant: any non-terminal row.
    pub async fn find_active(pool: &PgPool) -> Result<Option<OrchestrationRun>, sqlx::Error> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM billrun_orchestration_runs \
             WHERE state = 'running' \
             ORDER BY run_id DESC LIMIT 1"
        );
        sqlx::query_as::<_, OrchestrationRun>(&sql)
            .fetch_optional(pool)
            .await
    }

    /// Most recent run regardless of state, for the status surface.
    pub async fn find_latest(pool: &PgPool) -> Result<Option<OrchestrationRun>, sqlx::Error> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM billrun_orchestration_runs \
             ORDER BY run_id DESC LIMIT 1"
        );
        sqlx::query_as::<_, OrchestrationRun>(&sql)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<OrchestrationRun>, sqlx::Error> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM billrun_orchestration_runs WHERE run_id = $1");
        sqlx::query_as::<_, OrchestrationRun>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Non-terminal runs older than `cutoff`, candidates for startup
    /// recovery.
    pub async fn find_stuck(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrchestrationRun>, sqlx::Error> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM billrun_orchestration_runs \
             WHERE state = 'running' AND started_at < $1 \
             ORDER BY run_id"
        );
        sqlx::query_as::<_, OrchestrationRun>(&sql)
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// Advance to a phase, resetting the per-phase progress counters.
    pub async fn advance_phase(
        pool: &PgPool,
        run_id: i64,
        phase: OrchestrationPhase,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_orchestration_runs \
             SET current_phase = $2, processed_items = 0, total_items = 0, updated_at = NOW() \
             WHERE run_id = $1 AND state = 'running'",
        )
        .bind(run_id)
        .bind(phase.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_progress(
        pool: &PgPool,
        run_id: i64,
        processed: i32,
        total: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_orchestration_runs \
             SET processed_items = $2, total_items = $3, updated_at = NOW() \
             WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(processed)
        .bind(total)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn append_warning(pool: &PgPool, run_id: i64, text: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_orchestration_runs \
             SET warning = COALESCE(warning || E'\\n', '') || $2, updated_at = NOW() \
             WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(text)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn complete(pool: &PgPool, run_id: i64) -> Result<u64, sqlx::Error> {
        Self::finalize(pool, run_id, RunState::Completed, None).await
    }

    pub async fn fail(pool: &PgPool, run_id: i64, note: &str) -> Result<u64, sqlx::Error> {
        Self::finalize(pool, run_id, RunState::Failed, Some(note)).await
    }

    pub async fn cancel(pool: &PgPool, run_id: i64, note: &str) -> Result<u64, sqlx::Error> {
        Self::finalize(pool, run_id, RunState::Cancelled, Some(note)).await
    }

    /// Guarded on `state = 'running'` so a run is finalized exactly once,
    /// whether by its pipeline or by recovery.
    async fn finalize(
        pool: &PgPool,
        run_id: i64,
        state: RunState,
        note: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_orchestration_runs \
             SET state = $2, failure_note = COALESCE($3, failure_note), \
                 finished_at = NOW(), updated_at = NOW() \
             WHERE run_id = $1 AND state = 'running'",
        )
        .bind(run_id)
        .bind(state.to_string())
        .bind(note)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub fn run_state(&self) -> Result<RunState, String> {
        self.state.parse()
    }

    pub fn phase(&self) -> Result<OrchestrationPhase, String> {
        self.current_phase.parse()
    }
}
