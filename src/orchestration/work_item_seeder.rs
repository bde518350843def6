//! Phase 2: create work items for accounts that are due.

use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;
use tracing::info;

use super::pipeline::PhaseError;
use crate::constants::PERIOD_FORMAT;
use crate::models::{Account, NewWorkItem, OrchestrationRun, WorkItem};

/// Computed urgency of an account's current billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    RunNow,
    DueSoon,
    NotDue,
}

pub fn period_of(date: NaiveDate) -> String {
    date.format(PERIOD_FORMAT).to_string()
}

pub fn previous_period(date: NaiveDate) -> String {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    format!("{year:04}-{month:02}")
}

pub fn days_until_period_end(date: NaiveDate) -> u32 {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // First of next month always exists.
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    (first_of_next - date).num_days().saturating_sub(1) as u32
}

/// Classify how urgently an account needs its current period processed.
///
/// `YYYY-MM` strings compare correctly lexicographically, so period ordering
/// is plain string ordering.
pub fn classify_due(
    last_successful_period: Option<&str>,
    today: NaiveDate,
    due_soon_days_before_end: u32,
) -> DueStatus {
    let previous = previous_period(today);
    match last_successful_period {
        // Nothing ever retrieved, or more than one period behind.
        None => DueStatus::RunNow,
        Some(last) if last < previous.as_str() => DueStatus::RunNow,
        // Caught up through last period: current period becomes urgent as
        // its end approaches.
        Some(last) if last == previous.as_str() => {
            if days_until_period_end(today) <= due_soon_days_before_end {
                DueStatus::DueSoon
            } else {
                DueStatus::NotDue
            }
        }
        // Current (or a later) period already retrieved.
        Some(_) => DueStatus::NotDue,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub examined: usize,
    pub created: usize,
    pub already_present: usize,
    pub skipped_missing_history: usize,
    pub not_due: usize,
}

pub struct WorkItemSeeder {
    pool: PgPool,
    due_soon_days_before_end: u32,
}

impl WorkItemSeeder {
    pub fn new(pool: PgPool, due_soon_days_before_end: u32) -> Self {
        Self {
            pool,
            due_soon_days_before_end,
        }
    }

    pub async fn run(&self, run: &OrchestrationRun) -> Result<SeedReport, PhaseError> {
        let accounts = Account::list_active(&self.pool).await?;
        let today = chrono::Utc::now().date_naive();
        let period = period_of(today);
        let total = accounts.len();

        let mut report = SeedReport::default();
        for account in accounts {
            report.examined += 1;

            if account.history_missing {
                report.skipped_missing_history += 1;
            } else {
                match classify_due(
                    account.last_successful_period.as_deref(),
                    today,
                    self.due_soon_days_before_end,
                ) {
                    DueStatus::RunNow | DueStatus::DueSoon => {
                        let new = NewWorkItem {
                            account_number: account.account_number.clone(),
                            provider_id: account.provider_id,
                            period: period.clone(),
                            credential_ref: account.credential_ref.clone(),
                        };
                        // The (account, period) unique key makes re-running
                        // this phase idempotent.
                        match WorkItem::create_if_absent(&self.pool, &new).await? {
                            Some(_) => report.created += 1,
                            None => report.already_present += 1,
                        }
                    }
                    DueStatus::NotDue => report.not_due += 1,
                }
            }

            if report.examined % 250 == 0 || report.examined == total {
                OrchestrationRun::set_progress(
                    &self.pool,
                    run.run_id,
                    report.examined as i32,
                    total as i32,
                )
                .await?;
            }
        }

        info!(
            examined = report.examined,
            created = report.created,
            already_present = report.already_present,
            "work item seeding complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_helpers() {
        assert_eq!(period_of(date(2026, 7, 15)), "2026-07");
        assert_eq!(previous_period(date(2026, 7, 15)), "2026-06");
        assert_eq!(previous_period(date(2026, 1, 2)), "2025-12");
        assert_eq!(days_until_period_end(date(2026, 7, 31)), 0);
        assert_eq!(days_until_period_end(date(2026, 7, 1)), 30);
        assert_eq!(days_until_period_end(date(2026, 12, 31)), 0);
    }

    #[test]
    fn never_retrieved_runs_now() {
        assert_eq!(classify_due(None, date(2026, 7, 10), 5), DueStatus::RunNow);
    }

    #[test]
    fn more_than_one_period_behind_runs_now() {
        assert_eq!(
            classify_due(Some("2026-04"), date(2026, 7, 10), 5),
            DueStatus::RunNow
        );
    }

    #[test]
    fn caught_up_account_becomes_due_soon_near_period_end() {
        // Last period done; mid-month is not due yet.
        assert_eq!(
            classify_due(Some("2026-06"), date(2026, 7, 10), 5),
            DueStatus::NotDue
        );
        // Within the final 5 days of July it becomes DueSoon.
        assert_eq!(
            classify_due(Some("2026-06"), date(2026, 7, 28), 5),
            DueStatus::DueSoon
        );
    }

    #[test]
    fn current_period_already_retrieved_is_not_due() {
        assert_eq!(
            classify_due(Some("2026-07"), date(2026, 7, 28), 5),
            DueStatus::NotDue
        );
    }

    #[test]
    fn year_boundary_comparisons_hold() {
        // December done, early January: caught up, not yet due.
        assert_eq!(
            classify_due(Some("2025-12"), date(2026, 1, 5), 5),
            DueStatus::NotDue
        );
        // November last: a full period behind in January.
        assert_eq!(
            classify_due(Some("2025-11"), date(2026, 1, 5), 5),
            DueStatus::RunNow
        );
    }
}
