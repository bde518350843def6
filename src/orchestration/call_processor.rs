//! Phase 4: the billable external call, bounded concurrency.
//!
//! Before calling, each worker consults the execution ledger for a prior
//! successful scrape call for its item and skips the submission if one
//! exists. That check is what keeps a crash-and-rerun (or a retried phase)
//! from billing the same account/period twice.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pipeline::{spawn_progress_mirror, PhaseError};
use super::worker_pool::{PoolRunReport, WorkerPool};
use crate::clients::ProviderClient;
use crate::ledger::ExecutionLedger;
use crate::models::{OrchestrationRun, WorkItem};
use crate::state_machine::{CallPhase, WorkItemState};

pub struct CallProcessor {
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    worker_count: usize,
}

impl CallProcessor {
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
        let items = WorkItem::list_in_state(&self.pool, WorkItemState::CredentialVerified).await?;
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
                async move { submit_one(pool, client, ledger, item).await }
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
            submitted = report.succeeded(),
            failed = report.failed(),
            "billable call phase complete"
        );
        Ok(report)
    }
}

async fn submit_one(
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    item: WorkItem,
) -> Result<(), String> {
    let id = item.work_item_id;

    // Idempotency guard against double billing: a successful prior call for
    // this item's phase means the charge was already incurred — advance the
    // item without calling again.
    let already_called = ledger
        .has_successful_call(id, CallPhase::ScrapeCall)
        .await
        .map_err(|e| e.to_string())?;
    if already_called {
        debug!(
            work_item_id = id,
            "scrape call already recorded; skipping submission"
        );
        WorkItem::update_state(&pool, id, WorkItemState::CallSubmitted)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(());
    }

    WorkItem::record_attempt(&pool, id)
        .await
        .map_err(|e| e.to_string())?;

    let call = ledger
        .open_call(
            id,
            CallPhase::ScrapeCall,
            Some(json!({
                "account_number": item.account_number,
                "period": item.period,
            })),
        )
        .await
        .map_err(|e| e.to_string())?;

    match client.submit_scrape(&item.account_number, &item.period).await {
        Ok(receipt) => {
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({
                        "remote_ref": receipt.remote_ref,
                        "accepted_at": receipt.accepted_at.to_rfc3339(),
                    })),
                    true,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::update_state(&pool, id, WorkItemState::CallSubmitted)
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "error": message })),
                    false,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::mark_failed(&pool, id, WorkItemState::Failed, &message)
                .await
                .map_err(|e| e.to_string())?;
            Err(message)
        }
    }
}
