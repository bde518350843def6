use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// One attempt of a schedule (or a deferred retry placeholder).
/// Maps to the `billrun_executions` table.
///
/// Rows are created when an attempt starts and mutated only by the
/// executor/retry scheduler that owns the attempt. Once terminal a row is
/// immutable except for archival soft-delete; each retry is a new row with
/// an incremented `retry_count`, never an overwrite of a prior attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobExecution {
    pub execution_id: i64,
    pub schedule_id: i64,
    pub state: String,
    pub retry_count: i32,
    pub triggered_by: String,
    /// Set when the attempt actually starts; NULL on retry placeholders.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// When a `retrying` placeholder is due to fire.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub stack: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const EXECUTION_COLUMNS: &str = "execution_id, schedule_id, state, retry_count, triggered_by, \
     started_at, finished_at, duration_ms, scheduled_for, output, error, stack, \
     deleted_at, created_at, updated_at";

impl JobExecution {
    /// Create a row already in `running` state, before any work happens, so
    /// a crash mid-execution leaves discoverable evidence.
    pub async fn start(
        pool: &PgPool,
        schedule_id: i64,
        retry_count: i32,
        triggered_by: &str,
    ) -> Result<JobExecution, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_executions (schedule_id, state, retry_count, triggered_by, started_at) \
             VALUES ($1, 'running', $2, $3, NOW()) \
             RETURNING {EXECUTION_COLUMNS}"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(schedule_id)
            .bind(retry_count)
            .bind(triggered_by)
            .fetch_one(pool)
            .await
    }

    /// Create a deferred retry placeholder. The placeholder is promoted to
    /// `running` when its trigger fires.
    pub async fn create_retry_placeholder(
        pool: &PgPool,
        schedule_id: i64,
        retry_count: i32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<JobExecution, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_executions (schedule_id, state, retry_count, triggered_by, scheduled_for) \
             VALUES ($1, 'retrying', $2, 'retry_scheduler', $3) \
             RETURNING {EXECUTION_COLUMNS}"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(schedule_id)
            .bind(retry_count)
            .bind(scheduled_for)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<JobExecution>, sqlx::Error> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM billrun_executions WHERE execution_id = $1");
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The pending placeholder for a given attempt number, if one exists.
    pub async fn find_retry_placeholder(
        pool: &PgPool,
        schedule_id: i64,
        retry_count: i32,
    ) -> Result<Option<JobExecution>, sqlx::Error> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM billrun_executions \
             WHERE schedule_id = $1 AND retry_count = $2 AND state = 'retrying' \
               AND deleted_at IS NULL \
             ORDER BY execution_id DESC LIMIT 1"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(schedule_id)
            .bind(retry_count)
            .fetch_optional(pool)
            .await
    }

    /// Promote a `scheduled` row or `retrying` placeholder to `running`.
    /// Guarded by state in the WHERE clause so a double-fired trigger cannot
    /// start the same attempt twice.
    pub async fn promote_to_running(
        pool: &PgPool,
        id: i64,
        triggered_by: &str,
    ) -> Result<Option<JobExecution>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_executions \
             SET state = 'running', started_at = NOW(), triggered_by = $2, updated_at = NOW() \
             WHERE execution_id = $1 AND state IN ('scheduled', 'retrying') \
             RETURNING {EXECUTION_COLUMNS}"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(id)
            .bind(triggered_by)
            .fetch_optional(pool)
            .await
    }

    /// Finalize a running attempt. Duration is computed from `started_at`
    /// in SQL so clock reads stay consistent.
    pub async fn finalize(
        pool: &PgPool,
        id: i64,
        state: &str,
        output: Option<&str>,
        error: Option<&str>,
        stack: Option<&str>,
    ) -> Result<Option<JobExecution>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_executions \
             SET state = $2, output = $3, error = $4, stack = $5, finished_at = NOW(), \
                 duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
                 updated_at = NOW() \
             WHERE execution_id = $1 AND state = 'running' \
             RETURNING {EXECUTION_COLUMNS}"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(id)
            .bind(state)
            .bind(output)
            .bind(error)
            .bind(stack)
            .fetch_optional(pool)
            .await
    }

    /// Append text to the error column without touching the state. Used when
    /// retry-trigger registration fails after the row went terminal.
    pub async fn append_error(pool: &PgPool, id: i64, text: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_executions \
             SET error = COALESCE(error || E'\\n', '') || $2, updated_at = NOW() \
             WHERE execution_id = $1",
        )
        .bind(id)
        .bind(text)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark a never-started row cancelled (used when a schedule is paused or
    /// deleted with a retry pending).
    pub async fn cancel_placeholder(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_executions \
             SET state = 'cancelled', finished_at = NOW(), updated_at = NOW() \
             WHERE execution_id = $1 AND state IN ('scheduled', 'retrying')",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Ordered attempt history for a schedule, oldest first.
    pub async fn history_for_schedule(
        pool: &PgPool,
        schedule_id: i64,
    ) -> Result<Vec<JobExecution>, sqlx::Error> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM billrun_executions \
             WHERE schedule_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, execution_id ASC"
        );
        sqlx::query_as::<_, JobExecution>(&sql)
            .bind(schedule_id)
            .fetch_all(pool)
            .await
    }

    pub fn execution_state(&self) -> Result<crate::state_machine::ExecutionState, String> {
        self.state.parse()
    }
}
