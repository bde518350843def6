//! Phase 3: verify account credentials, bounded concurrency.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pipeline::{spawn_progress_mirror, PhaseError};
use super::worker_pool::{PoolRunReport, WorkerPool};
use crate::clients::ProviderClient;
use crate::ledger::ExecutionLedger;
use crate::models::{OrchestrationRun, WorkItem};
use crate::state_machine::{CallPhase, WorkItemState};

pub struct CredentialVerifier {
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    worker_count: usize,
}

impl CredentialVerifier {
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
        let items = WorkItem::list_in_state(&self.pool, WorkItemState::Pending).await?;
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
                async move { verify_one(pool, client, ledger, item).await }
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
            verified = report.succeeded(),
            failed = report.failed(),
            "credential verification phase complete"
        );
        Ok(report)
    }
}

/// One item, start to finish: state forward, ledger open, provider call,
/// ledger close, state settle. A failure marks this item only; the run is
/// never aborted from here.
async fn verify_one(
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    ledger: ExecutionLedger,
    item: WorkItem,
) -> Result<(), String> {
    let id = item.work_item_id;

    WorkItem::update_state(&pool, id, WorkItemState::CredentialCheckInProgress)
        .await
        .map_err(|e| e.to_string())?;

    let Some(credential_ref) = item.credential_ref.clone() else {
        let reason = "no credential on file";
        WorkItem::mark_failed(&pool, id, WorkItemState::CredentialFailed, reason)
            .await
            .map_err(|e| e.to_string())?;
        return Err(reason.to_string());
    };

    let call = ledger
        .open_call(
            id,
            CallPhase::CredentialCheck,
            Some(json!({ "account_number": item.account_number })),
        )
        .await
        .map_err(|e| e.to_string())?;

    match client
        .verify_credentials(&item.account_number, &credential_ref)
        .await
    {
        Ok(crate::clients::CredentialCheck::Valid) => {
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "valid": true })),
                    true,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::update_state(&pool, id, WorkItemState::CredentialVerified)
                .await
                .map_err(|e| e.to_string())?;
            Ok(())
        }
        Ok(crate::clients::CredentialCheck::Invalid { reason }) => {
            ledger
                .close_call(
                    call.work_item_execution_id,
                    Some(json!({ "valid": false, "reason": reason })),
                    false,
                )
                .await
                .map_err(|e| e.to_string())?;
            WorkItem::mark_failed(&pool, id, WorkItemState::CredentialFailed, &reason)
                .await
                .map_err(|e| e.to_string())?;
            Err(reason)
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
            WorkItem::mark_failed(&pool, id, WorkItemState::CredentialFailed, &message)
                .await
                .map_err(|e| e.to_string())?;
            Err(message)
        }
    }
}
