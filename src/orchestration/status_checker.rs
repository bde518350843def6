//! Phase 5: poll the provider for completion of outstanding calls.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pipeline::{spawn_progress_mirror, PhaseError};
use super::worker_pool::{PoolRunReport, WorkerPool};
use crate::clients::{ProviderClient, ScrapeStatus};
use crate::ledger::ExecutionLedger;
use crate::models::{Account, OrchestrationRun, WorkItem};
use crate::state_machine::{CallPhase, WorkItemState};

pub struct StatusChecker {
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    worker_count: usize,
}

impl StatusChecker {
    pub fn new(
        pool: PgPool,
        client: Arc<dyn ProviderClient>,
        ledger: ExecutionLedger,
        worker_count: usize,
    ) -> Self {
        Self {
            pool,
            client,
            ledger,
            worker_count,
        }
    }

    pub async fn run(
        &self,
        run: &OrchestrationRun,
        cancel: &CancellationToken,
    ) -> Result<PoolRunReport<WorkItem>, PhaseError> {
        let items = WorkItem::list_in_state(&self.pool, WorkItemState::CallSubmitted).await?;
        let workers = WorkerPool::new(self.worker_count);
        let mirror = spawn_progress_mirror(self.pool.clone(), run.run_id, workers.progress());

        let pool = self.pool.clone();
        let client = Arc::clone(&self.client);
        let ledger = self.ledger.clone();

        let report = workers
            .process_all(items, cancel, move |item| {
                let pool = pool.clone();
                let client = Arc::clone(&client);
                let ledger = ledger.clone();
                async move { check_one(pool, client, ledger, item).await }
            })
            .await;

        mirror.abort();
        let total = report.results.len();
        OrchestrationRun::set_progress(
            &self.pool,
            run.run_id,
            (total - report.interrupted()) as i32,
            total as i32,
        )
        .await?;
        info!(
            checked = report.succeeded(),
            failed = report.failed(),
            "status check phase complete"
        );
        Ok(report)
    }
}

async fn check_one(
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    item: WorkItem,
) -> Result<(), String> {
    let id = item.work_item_id;

    // The remote reference comes from the recorded scrape receipt; an item
    // in CallSubmitted without one is inconsistent and goes to review.
    let remote_ref = ledger
        .latest_successful_call(id, CallPhase::ScrapeCall)
        .await
        .map_err(|e| e.to_string())?
        .and_then(|call| call.response)
        .and_then(|response| {
            response
                .get("remote_ref")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
    let Some(remote_ref) = remote_ref else {
        let reason = "no scrape receipt on record";
        WorkItem::mark_failed(&pool, id, WorkItemState::NeedsReview, reason)
            .await
            .map_err(|e| e.to_string())?;
        return Err(reason.to_string());
    };

    let call = ledger
        .open_call(
            id,
            CallPhase::StatusCheck,
            Some(json!({ "remote_ref": remote_ref })),
        )
        .await
        .map_err(|e| e.to_string())?;

    match client.scrape_status(&remote_ref).await {
        Ok(ScrapeStatus::Complete { document_ref }) => {
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "status": "complete", "document_ref": document_ref })),
                    true,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::update_state(&pool, id, WorkItemState::Completed)
                .await
                .map_err(|e| e.to_string())?;
            Account::record_successful_period(
                &pool,
                item.provider_id,
                &item.account_number,
                &item.period,
            )
            .await
            .map_err(|e| e.to_string())?;
            Ok(())
        }
        Ok(ScrapeStatus::InProgress) => {
            // Still working provider-side; the item stays in CallSubmitted
            // for the next run's status check.
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "status": "in_progress" })),
                    true,
                )
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        }
        Ok(ScrapeStatus::Failed { reason }) => {
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "status": "failed", "reason": reason })),
                    true,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::mark_failed(&pool, id, WorkItemState::Failed, &reason)
                .await
                .map_err(|e| e.to_string())?;
            Err(reason)
        }
        Err(e) => {
            // Provider unreachable after client-side retries: leave the item
            // in CallSubmitted and try again next run.
            let message = e.to_string();
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "error": message })),
                    false,
                )
                .await
                .map_err(|e| e.to_string())?;
            Err(message)
        }
    }
}
