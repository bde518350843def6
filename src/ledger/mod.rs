//! Execution ledger: the append-only attempt history used for audit and as
//! the idempotency source of truth for billable calls.

use sqlx::PgPool;

use crate::models::{JobExecution, WorkItemExecution};
use crate::state_machine::CallPhase;

/// Read/write facade over the attempt-history tables.
///
/// Attempt rows are opened before any work happens and finalized when it
/// ends; no attempt ever mutates another attempt's row.
#[derive(Clone)]
pub struct ExecutionLedger {
    pool: PgPool,
}

impl ExecutionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The double-billing guard: was a billable (or other) call of this
    /// phase already made successfully for this work item?
    pub async fn has_successful_call(
        &self,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<bool, sqlx::Error> {
        WorkItemExecution::has_successful(&self.pool, work_item_id, phase).await
    }

    /// Open a phase-call record before the call goes out.
    pub async fn open_call(
        &self,
        work_item_id: i64,
        phase: CallPhase,
        request: Option<serde_json::Value>,
    ) -> Result<WorkItemExecution, sqlx::Error> {
        WorkItemExecution::start(&self.pool, work_item_id, phase, request).await
    }

    /// Close a phase-call record with its raw response and success flag.
    pub async fn close_call(
        &self,
        call_id: i64,
        response: Option<serde_json::Value>,
        succeeded: bool,
    ) -> Result<(), sqlx::Error> {
        WorkItemExecution::finish(&self.pool, call_id, response, succeeded).await?;
        Ok(())
    }

    pub async fn latest_successful_call(
        &self,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<Option<WorkItemExecution>, sqlx::Error> {
        WorkItemExecution::latest_successful(&self.pool, work_item_id, phase).await
    }

    /// Retire ledger rows for one phase of one item so an operator-requested
    /// refire is not suppressed. Deliberately the only way around the
    /// idempotency check.
    pub async fn retire_calls_for_refire(
        &self,
        work_item_id: i64,
        phase: CallPhase,
    ) -> Result<u64, sqlx::Error> {
        WorkItemExecution::soft_delete_for_phase(&self.pool, work_item_id, phase).await
    }

    /// Ordered attempt chain for a schedule, for audit.
    pub async fn attempt_history(
        &self,
        schedule_id: i64,
    ) -> Result<Vec<JobExecution>, sqlx::Error> {
        JobExecution::history_for_schedule(&self.pool, schedule_id).await
    }

    /// Full phase-call history for one work item, for audit.
    pub async fn call_history(
        &self,
        work_item_id: i64,
    ) -> Result<Vec<WorkItemExecution>, sqlx::Error> {
        WorkItemExecution::history_for_item(&self.pool, work_item_id).await
    }
}
