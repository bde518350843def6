//! Phase 1: synchronize provider accounts into local storage.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use super::pipeline::PhaseError;
use crate::clients::ProviderClient;
use crate::models::{Account, OrchestrationRun};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: u64,
    pub expected: Option<u64>,
    pub soft_deleted: u64,
    pub sweep_skipped: bool,
}

/// The deletion sweep only runs when the fetched count reconciles with what
/// the provider reported. A page failure or a count mismatch skips the sweep
/// — a warning beats false deletions at this scale.
pub fn counts_reconcile(fetched: u64, reported: Option<u64>, fetch_failed: bool) -> bool {
    if fetch_failed {
        return false;
    }
    match reported {
        Some(expected) => expected == fetched,
        None => true,
    }
}

pub struct AccountSynchronizer {
    pool: PgPool,
    client: Arc<dyn ProviderClient>,
    page_size: u32,
}

impl AccountSynchronizer {
    pub fn new(pool: PgPool, client: Arc<dyn ProviderClient>, page_size: u32) -> Self {
        Self {
            pool,
            client,
            page_size,
        }
    }

    pub async fn run(&self, run: &OrchestrationRun) -> Result<SyncReport, PhaseError> {
        let sweep_cutoff = Utc::now();
        let mut report = SyncReport::default();
        let mut fetch_failed = false;
        let mut page = 1u32;

        loop {
            match self.client.fetch_accounts(page, self.page_size).await {
                Ok(listing) => {
                    if listing.records.is_empty() {
                        break;
                    }
                    let batch_len = listing.records.len() as u64;
                    Account::upsert_batch(&self.pool, &listing.records).await?;
                    report.fetched += batch_len;
                    report.expected = listing.total_reported.or(report.expected);

                    let total = report.expected.unwrap_or(report.fetched);
                    OrchestrationRun::set_progress(
                        &self.pool,
                        run.run_id,
                        report.fetched.min(i32::MAX as u64) as i32,
                        total.min(i32::MAX as u64) as i32,
                    )
                    .await?;

                    if batch_len < self.page_size as u64 {
                        break;
                    }
                    page += 1;
                }
                Err(e) => {
                    // The client already retried transient failures; give up
                    // on the remaining pages but keep what was synced.
                    warn!(page, error = %e, "account page fetch failed; stopping pagination");
                    fetch_failed = true;
                    break;
                }
            }
        }

        if counts_reconcile(report.fetched, report.expected, fetch_failed) {
            report.soft_deleted = Account::soft_delete_untouched(&self.pool, sweep_cutoff).await?;
            info!(
                fetched = report.fetched,
                soft_deleted = report.soft_deleted,
                "account sync complete"
            );
        } else {
            report.sweep_skipped = true;
            let note = format!(
                "account deletion sweep skipped: fetched {} of expected {:?}{}",
                report.fetched,
                report.expected,
                if fetch_failed { " (page fetch failed)" } else { "" }
            );
            warn!(run_id = run.run_id, note, "skipping deletion sweep");
            OrchestrationRun::append_warning(&self.pool, run.run_id, &note).await?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciles_when_counts_match() {
        assert!(counts_reconcile(10_000, Some(10_000), false));
    }

    #[test]
    fn mismatched_counts_do_not_reconcile() {
        // 9,995 of 10,000 fetched: the sweep must be skipped.
        assert!(!counts_reconcile(9_995, Some(10_000), false));
        assert!(!counts_reconcile(10_005, Some(10_000), false));
    }

    #[test]
    fn page_failure_never_reconciles() {
        assert!(!counts_reconcile(10_000, Some(10_000), true));
        assert!(!counts_reconcile(0, None, true));
    }

    #[test]
    fn missing_reported_total_reconciles_without_failures() {
        assert!(counts_reconcile(123, None, false));
    }
}
