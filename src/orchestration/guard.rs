//! Concurrency guard: at most one orchestration run at a time.
//!
//! Two layers. The in-process slot is a fast-path short-circuit held under
//! an async mutex for the whole admission, so two local callers cannot both
//! pass. The durable check — any non-terminal run row — is the authority
//! across restarts; the slot alone is never trusted.

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::models::OrchestrationRun;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("could not create orchestration run: {0}")]
    RunCreation(#[from] sqlx::Error),
}

/// Admission decision. A second request while one run is active is rejected
/// outright (not queued) and receives the in-flight run's correlation id.
#[derive(Debug)]
pub enum Admission {
    Admitted(OrchestrationRun),
    Rejected {
        /// Correlation id of the in-flight run; `None` only if the lookup
        /// itself failed (logged).
        active_correlation_id: Option<Uuid>,
    },
}

pub struct ConcurrencyGuard {
    pool: PgPool,
    /// Run id currently holding the slot.
    slot: Mutex<Option<i64>>,
}

impl ConcurrencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            slot: Mutex::new(None),
        }
    }

    /// Try to admit a new run. On success the run row is already created in
    /// `running` state and the slot is held until [`release`](Self::release).
    pub async fn try_admit(&self) -> Result<Admission, GuardError> {
        let mut slot = self.slot.lock().await;

        if slot.is_some() {
            return Ok(Admission::Rejected {
                active_correlation_id: self.active_correlation_id().await,
            });
        }

        // Durable check: a non-terminal row from a previous process (or a
        // crash) blocks admission even though the in-process slot is free.
        // A failed check degrades to "treat as not running" so guard
        // trouble cannot block runs forever; the run-creation insert below
        // would fail too if the database is truly down.
        match OrchestrationRun::find_active(&self.pool).await {
            Ok(Some(active)) => {
                return Ok(Admission::Rejected {
                    active_correlation_id: Some(active.correlation_id),
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "durable single-run check failed; treating as not running");
            }
        }

        let run = OrchestrationRun::create(&self.pool).await?;
        *slot = Some(run.run_id);
        Ok(Admission::Admitted(run))
    }

    /// Re-occupy the slot for a run adopted by recovery/resume.
    pub async fn occupy(&self, run_id: i64) {
        let mut slot = self.slot.lock().await;
        *slot = Some(run_id);
    }

    /// Release the slot held by `run_id`. Releasing somebody else's slot is
    /// a no-op, so a late finalizer cannot free a newer run's admission.
    pub async fn release(&self, run_id: i64) {
        let mut slot = self.slot.lock().await;
        if *slot == Some(run_id) {
            *slot = None;
        }
    }

    pub async fn held_by(&self) -> Option<i64> {
        *self.slot.lock().await
    }

    async fn active_correlation_id(&self) -> Option<Uuid> {
        match OrchestrationRun::find_active(&self.pool).await {
            Ok(run) => run.map(|r| r.correlation_id),
            Err(e) => {
                warn!(error = %e, "active run lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/billrun_test")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn release_of_foreign_run_is_a_no_op() {
        let guard = ConcurrencyGuard::new(lazy_pool());
        guard.occupy(7).await;

        guard.release(99).await;
        assert_eq!(guard.held_by().await, Some(7));

        guard.release(7).await;
        assert_eq!(guard.held_by().await, None);
    }

    #[tokio::test]
    async fn occupy_then_release_cycles_the_slot() {
        let guard = ConcurrencyGuard::new(lazy_pool());
        assert_eq!(guard.held_by().await, None);
        guard.occupy(1).await;
        assert_eq!(guard.held_by().await, Some(1));
        guard.release(1).await;
        assert_eq!(guard.held_by().await, None);
    }
}
