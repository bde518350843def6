//! Archival of aged execution and phase-call records.
//!
//! Copies terminal rows past the archive age into the archive tables and
//! soft-deletes the originals, then purges archive rows past retention.
//! Runs in bounded batches so it coexists with live traffic; it shares the
//! executor lifecycle by way of the `archival` job kind.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::config::ArchivalConfig;
use crate::execution::outcome::Outcome;
use crate::execution::work_unit::{UnitContext, WorkUnit};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchivalReport {
    pub executions_archived: u64,
    pub calls_archived: u64,
    pub executions_purged: u64,
    pub calls_purged: u64,
}

pub struct ArchivalService {
    pool: PgPool,
    config: ArchivalConfig,
}

impl ArchivalService {
    pub fn new(pool: PgPool, config: ArchivalConfig) -> Self {
        Self { pool, config }
    }

    pub async fn run(&self) -> Result<ArchivalReport, sqlx::Error> {
        let mut report = ArchivalReport::default();

        report.executions_archived = self
            .archive_batched(
                "WITH candidates AS ( \
                     SELECT execution_id FROM billrun_executions \
                     WHERE deleted_at IS NULL AND finished_at IS NOT NULL \
                       AND finished_at < NOW() - make_interval(days => $1::INT) \
                     LIMIT $2 \
                 ), copied AS ( \
                     INSERT INTO billrun_executions_archive \
                     SELECT e.* FROM billrun_executions e \
                     WHERE e.execution_id IN (SELECT execution_id FROM candidates) \
                     RETURNING execution_id \
                 ) \
                 UPDATE billrun_executions SET deleted_at = NOW() \
                 WHERE execution_id IN (SELECT execution_id FROM copied)",
            )
            .await?;

        report.calls_archived = self
            .archive_batched(
                "WITH candidates AS ( \
                     SELECT work_item_execution_id FROM billrun_work_item_executions \
                     WHERE deleted_at IS NULL AND finished_at IS NOT NULL \
                       AND finished_at < NOW() - make_interval(days => $1::INT) \
                     LIMIT $2 \
                 ), copied AS ( \
                     INSERT INTO billrun_work_item_executions_archive \
                     SELECT w.* FROM billrun_work_item_executions w \
                     WHERE w.work_item_execution_id IN \
                         (SELECT work_item_execution_id FROM candidates) \
                     RETURNING work_item_execution_id \
                 ) \
                 UPDATE billrun_work_item_executions SET deleted_at = NOW() \
                 WHERE work_item_execution_id IN \
                     (SELECT work_item_execution_id FROM copied)",
            )
            .await?;

        report.executions_purged = self
            .purge(
                "DELETE FROM billrun_executions_archive \
                 WHERE finished_at < NOW() - make_interval(days => $1::INT)",
            )
            .await?;
        report.calls_purged = self
            .purge(
                "DELETE FROM billrun_work_item_executions_archive \
                 WHERE finished_at < NOW() - make_interval(days => $1::INT)",
            )
            .await?;

        info!(
            executions_archived = report.executions_archived,
            calls_archived = report.calls_archived,
            executions_purged = report.executions_purged,
            calls_purged = report.calls_purged,
            "archival pass complete"
        );
        Ok(report)
    }

    async fn archive_batched(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let mut moved = 0u64;
        loop {
            let affected = sqlx::query(sql)
                .bind(self.config.archive_after_days)
                .bind(self.config.batch_size)
                .execute(&self.pool)
                .await?
                .rows_affected();
            moved += affected;
            if affected == 0 {
                break;
            }
        }
        Ok(moved)
    }

    async fn purge(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let affected = sqlx::query(sql)
            .bind(self.config.purge_after_days)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}

/// Adapter so archival runs as an ordinary scheduled job.
pub struct ArchivalUnit {
    config: ArchivalConfig,
}

impl ArchivalUnit {
    pub fn new(config: ArchivalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkUnit for ArchivalUnit {
    async fn run(&self, ctx: &UnitContext) -> Outcome {
        if ctx.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let service = ArchivalService::new(ctx.pool.clone(), self.config.clone());
        match service.run().await {
            Ok(report) => Outcome::Success {
                output: format!(
                    "archived {} executions and {} calls; purged {} / {}",
                    report.executions_archived,
                    report.calls_archived,
                    report.executions_purged,
                    report.calls_purged
                ),
            },
            Err(e) => Outcome::failure(format!("archival failed: {e}")),
        }
    }
}
