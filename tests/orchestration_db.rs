//! Database-backed integration tests.
//!
//! These exercise the durable invariants (idempotent work-item creation,
//! the single non-terminal run rule, retry chains as separate rows) against
//! a real PostgreSQL instance and are ignored by default; run them with a
//! `DATABASE_URL` pointing at a migrated test database:
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/billrun_test cargo test -- --ignored
//! ```

use anyhow::Result;
use billrun_core::models::{JobExecution, NewWorkItem, OrchestrationRun, WorkItem};
use billrun_core::orchestration::{Admission, ConcurrencyGuard};
use sqlx::PgPool;

async fn test_pool() -> Result<PgPool> {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/billrun_test".to_string());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    Ok(pool)
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn duplicate_work_item_creation_is_idempotent() -> Result<()> {
    let pool = test_pool().await?;
    let new = NewWorkItem {
        account_number: format!("acct-{}", uuid::Uuid::new_v4()),
        provider_id: 1,
        period: "2026-08".to_string(),
        credential_ref: Some("cred-1".to_string()),
    };

    let first = WorkItem::create_if_absent(&pool, &new).await?;
    assert!(first.is_some(), "first creation inserts");

    let second = WorkItem::create_if_absent(&pool, &new).await?;
    assert!(second.is_none(), "second creation is a no-op");
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn retry_chain_is_separate_rows_with_increasing_counts() -> Result<()> {
    let pool = test_pool().await?;
    let schedule_id = 999_001;

    let original = JobExecution::start(&pool, schedule_id, 0, "cron").await?;
    JobExecution::finalize(
        &pool,
        original.execution_id,
        "failed",
        None,
        Some("boom"),
        None,
    )
    .await?;

    for attempt in 1..=3 {
        let fire_at = chrono::Utc::now() + chrono::Duration::minutes(5 * attempt as i64);
        JobExecution::create_retry_placeholder(&pool, schedule_id, attempt, fire_at).await?;
    }

    let history = JobExecution::history_for_schedule(&pool, schedule_id).await?;
    assert_eq!(history.len(), 4, "1 original + 3 retries, never overwritten");
    let counts: Vec<i32> = history.iter().map(|e| e.retry_count).collect();
    assert_eq!(counts, vec![0, 1, 2, 3]);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn second_admission_is_rejected_with_active_correlation_id() -> Result<()> {
    let pool = test_pool().await?;
    let guard = ConcurrencyGuard::new(pool.clone());

    let first = guard.try_admit().await?;
    let Admission::Admitted(run) = first else {
        panic!("first admission should succeed");
    };

    let second = guard.try_admit().await?;
    match second {
        Admission::Rejected {
            active_correlation_id,
        } => assert_eq!(active_correlation_id, Some(run.correlation_id)),
        Admission::Admitted(_) => panic!("second run must be rejected while one is active"),
    }

    // Exactly one non-terminal row.
    let active = OrchestrationRun::find_active(&pool).await?;
    assert_eq!(active.map(|r| r.run_id), Some(run.run_id));

    OrchestrationRun::fail(&pool, run.run_id, "test teardown").await?;
    guard.release(run.run_id).await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn durable_check_blocks_admission_after_simulated_restart() -> Result<()> {
    let pool = test_pool().await?;

    // First process admits a run, then "crashes" (its in-process guard
    // state is gone).
    let crashed_guard = ConcurrencyGuard::new(pool.clone());
    let Admission::Admitted(orphan) = crashed_guard.try_admit().await? else {
        panic!("admission should succeed");
    };
    drop(crashed_guard);

    // A fresh guard (new process) must still reject: the durable row is the
    // authority, not the in-process slot.
    let restarted_guard = ConcurrencyGuard::new(pool.clone());
    let admission = restarted_guard.try_admit().await?;
    assert!(matches!(admission, Admission::Rejected { .. }));

    OrchestrationRun::fail(&pool, orphan.run_id, "finalized by test recovery").await?;

    // With the orphan finalized, admission opens up again.
    let reopened = restarted_guard.try_admit().await?;
    let Admission::Admitted(run) = reopened else {
        panic!("admission should succeed after the orphan run is finalized");
    };
    OrchestrationRun::fail(&pool, run.run_id, "test teardown").await?;
    restarted_guard.release(run.run_id).await;
    Ok(())
}
