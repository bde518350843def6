use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::state_machine::WorkItemState;

/// One account/period unit advancing through the orchestration phases.
/// Maps to the `billrun_work_items` table, unique on `(account_number, period)`.
///
/// The uniqueness key is what makes work-item creation idempotent under
/// re-run and is the first line of defense against duplicate billable calls
/// for the same subject and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkItem {
    pub work_item_id: i64,
    pub account_number: String,
    pub provider_id: i64,
    /// Billing period this item covers, `YYYY-MM`.
    pub period: String,
    pub credential_ref: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub attempt_count: i32,
    pub last_touched_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub account_number: String,
    pub provider_id: i64,
    pub period: String,
    pub credential_ref: Option<String>,
}

const WORK_ITEM_COLUMNS: &str = "work_item_id, account_number, provider_id, period, credential_ref, \
     state, error, attempt_count, last_touched_at, deleted_at, created_at, updated_at";

impl WorkItem {
    /// Idempotent creation: `ON CONFLICT DO NOTHING` on the
    /// `(account_number, period)` key. Returns `None` when the item already
    /// existed, which re-runs of the create phase treat as success.
    pub async fn create_if_absent(
        pool: &PgPool,
        new: &NewWorkItem,
    ) -> Result<Option<WorkItem>, sqlx::Error> {
        let sql = format!(
            "INSERT INTO billrun_work_items \
             (account_number, provider_id, period, credential_ref, state, last_touched_at) \
             VALUES ($1, $2, $3, $4, 'pending', NOW()) \
             ON CONFLICT (account_number, period) DO NOTHING \
             RETURNING {WORK_ITEM_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(&new.account_number)
            .bind(new.provider_id)
            .bind(&new.period)
            .bind(&new.credential_ref)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<WorkItem>, sqlx::Error> {
        let sql = format!("SELECT {WORK_ITEM_COLUMNS} FROM billrun_work_items WHERE work_item_id = $1");
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_in_state(
        pool: &PgPool,
        state: WorkItemState,
    ) -> Result<Vec<WorkItem>, sqlx::Error> {
        let sql = format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM billrun_work_items \
             WHERE state = $1 AND deleted_at IS NULL \
             ORDER BY work_item_id"
        );
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(state.to_string())
            .fetch_all(pool)
            .await
    }

    /// Single-writer state update; also bumps `last_touched_at`, which the
    /// staleness sweep keys off.
    pub async fn update_state(
        pool: &PgPool,
        id: i64,
        state: WorkItemState,
    ) -> Result<Option<WorkItem>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_work_items \
             SET state = $2, last_touched_at = NOW(), updated_at = NOW() \
             WHERE work_item_id = $1 \
             RETURNING {WORK_ITEM_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(id)
            .bind(state.to_string())
            .fetch_optional(pool)
            .await
    }

    pub async fn mark_failed(
        pool: &PgPool,
        id: i64,
        state: WorkItemState,
        error: &str,
    ) -> Result<Option<WorkItem>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_work_items \
             SET state = $2, error = $3, attempt_count = attempt_count + 1, \
                 last_touched_at = NOW(), updated_at = NOW() \
             WHERE work_item_id = $1 \
             RETURNING {WORK_ITEM_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(id)
            .bind(state.to_string())
            .bind(error)
            .fetch_optional(pool)
            .await
    }

    pub async fn record_attempt(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_work_items \
             SET attempt_count = attempt_count + 1, last_touched_at = NOW(), updated_at = NOW() \
             WHERE work_item_id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Finalize items stuck in a pre-call state past the processing window.
    /// Used by the run's cleanup phase and, independently, by startup
    /// recovery for items abandoned by a crash.
    pub async fn finalize_stale(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE billrun_work_items \
             SET state = 'needs_review', \
                 error = COALESCE(error || E'\\n', '') || 'finalized by staleness sweep', \
                 last_touched_at = NOW(), updated_at = NOW() \
             WHERE state IN ('pending', 'credential_check_in_progress') \
               AND last_touched_at < $1 AND deleted_at IS NULL",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reset for operator-driven re-processing. The caller is responsible
    /// for retiring ledger rows so the idempotency check does not suppress
    /// the refire.
    pub async fn reset_for_refire(
        pool: &PgPool,
        id: i64,
    ) -> Result<Option<WorkItem>, sqlx::Error> {
        let sql = format!(
            "UPDATE billrun_work_items \
             SET state = 'credential_verified', error = NULL, \
                 last_touched_at = NOW(), updated_at = NOW() \
             WHERE work_item_id = $1 AND deleted_at IS NULL \
             RETURNING {WORK_ITEM_COLUMNS}"
        );
        sqlx::query_as::<_, WorkItem>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub fn work_item_state(&self) -> Result<WorkItemState, String> {
        self.state.parse()
    }
}
