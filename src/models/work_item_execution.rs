use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::state_machine::CallPhase;

/// One phase call for a work item (credential check, scrape call, status
/// check), including raw request/response payloads.
/// Maps to the `billrun_work_item_executions` table.
///
/// This table is the idempotency ledger: before making a billable call the
/// pipeline checks for a prior non-deleted successful row of the same phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkItemExecution {
    pub work_item_execution_id: i64,
    pub work_item_id: i64,
    pub phase: String,
    pub request: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const WIE_COLUMNS: &str = "work_item_execution_id, work_item_id, phase, request, response, \
     succeeded, started_at, finished_at, deleted_at, created_at";

impl WorkItemExecution {
    /// Open an attempt record before the call is made, so a crash mid-call
    /// leaves evidence.
    pub async fn start(
        pool: &PgPool,
        work_item_id: i64,
        phase: CallPhase,
        request: Option<serde_json::Value>,
    ) -> Result<WorkItemExecution, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_work_item_executions (work_item_id, phase, request, succeeded, started_at) \
             VALUES ($1, $2, $3, FALSE, NOW()) \
             RETURNING {WIE_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItemExecution>(&sql)
            .bind(work_item_id)
            .bind(phase.to_string())
            .bind(request)
            .fetch_one(pool)
            .await
    }

    pub async fn finish(
        pool: &PgPool,
        id: i64,
        response: Option<serde_json::Value>,
        succeeded: bool,
    ) -> Result<Option<WorkItemExecution>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_work_item_executions \
             SET response = $2, succeeded = $3, finished_at = NOW() \
             WHERE work_item_execution_id = $1 \
             RETURNING {WIE_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItemExecution>(&sql)
            .bind(id)
            .bind(response)
            .bind(succeeded)
            .fetch_optional(pool)
            .await
    }

    /// The idempotency question: has this phase already succeeded for this
    /// item?
    pub async fn has_successful(
        pool: &PgPool,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS ( \
                 SELECT 1 FROM billrun_work_item_executions \
                 WHERE work_item_id = $1 AND phase = $2 \
                   AND succeeded = TRUE AND deleted_at IS NULL \
             )",
        )
        .bind(work_item_id)
        .bind(phase.to_string())
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    pub async fn latest_successful(
        pool: &PgPool,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<Option<WorkItemExecution>, sqlx::Error> {
        let sql = format!(
            "SELECT {WIE_COLUMNS} FROM billrun_work_item_executions \
             WHERE work_item_id = $1 AND phase = $2 \
               AND succeeded = TRUE AND deleted_at IS NULL \
             ORDER BY work_item_execution_id DESC LIMIT 1"
        );
        sqlx::query_as::<_, WorkItemExecution>(&sql)
            .bind(work_item_id)
            .bind(phase.to_string())
            .fetch_optional(pool)
            .await
    }

    /// Retire ledger rows for a phase so a deliberate operator refire is not
    /// suppressed by the idempotency check.
    pub async fn soft_delete_for_phase(
        pool: &PgPool,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_work_item_executions \
             SET deleted_at = NOW() \
             WHERE work_item_id = $1 AND phase = $2 AND deleted_at IS NULL",
        )
        .bind(work_item_id)
        .bind(phase.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn history_for_item(
        pool: &PgPool,
        work_item_id: i64,
    ) -> Result<Vec<WorkItemExecution>, sqlx::Error> {
        let sql = format!(
            "SELECT {WIE_COLUMNS} FROM billrun_work_item_executions \
             WHERE work_item_id = $1 AND deleted_at IS NULL \
             ORDER BY work_item_execution_id ASC"
        );
        sqlx::query_as::<_, WorkItemExecution>(&sql)
            .bind(work_item_id)
            .fetch_all(pool)
            .await
    }
}
