//! Retry decisions and deferred re-invocation scheduling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::triggers::{TriggerError, TriggerRegistry};
use crate::constants::RETRY_TRIGGER_PREFIX;
use crate::events::EventPublisher;
use crate::models::{JobExecution, JobSchedule};

/// Outcome of a retry-scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retries exhausted, outcome not eligible, or registration failed.
    None,
    /// A deferred re-invocation was registered for this instant.
    ScheduledAt(DateTime<Utc>),
}

/// Exact exponential delay: `base * 2^retry_count`, no jitter.
///
/// The shift is clamped so absurd retry counts saturate instead of
/// overflowing.
pub fn retry_delay(base: Duration, retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 62) as u32;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(base.as_secs().saturating_mul(factor))
}

/// Deterministic, collision-free deferred trigger identifier for attempt
/// `attempt` of a schedule. Re-registration after a partial failure lands on
/// the same id, which is what makes the scheduling operation idempotent.
pub fn deferred_trigger_id(schedule_id: i64, attempt: i32) -> String {
    format!("{RETRY_TRIGGER_PREFIX}:{schedule_id}:{attempt}")
}

/// Decides whether a failed execution gets another attempt and registers the
/// deferred re-invocation when it does.
pub struct RetryScheduler {
    pool: PgPool,
    triggers: Arc<dyn TriggerRegistry>,
    events: EventPublisher,
}

impl RetryScheduler {
    pub fn new(pool: PgPool, triggers: Arc<dyn TriggerRegistry>, events: EventPublisher) -> Self {
        Self {
            pool,
            triggers,
            events,
        }
    }

    /// Schedule the next attempt for a failed/timed-out execution, if policy
    /// allows. Never propagates an error: a registration failure is appended
    /// to the execution's error text and logged, and the execution stays
    /// terminal `Failed`.
    pub async fn maybe_schedule_retry(
        &self,
        execution: &JobExecution,
        schedule: &JobSchedule,
    ) -> RetryDecision {
        match execution.execution_state() {
            Ok(state) if state.is_retry_eligible() => {}
            Ok(state) => {
                warn!(
                    execution_id = execution.execution_id,
                    %state,
                    "retry requested for non-retryable execution state"
                );
                return RetryDecision::None;
            }
            Err(invalid) => {
                error!(execution_id = execution.execution_id, state = %invalid, "invalid execution state");
                return RetryDecision::None;
            }
        }

        if execution.retry_count >= schedule.max_retries {
            info!(
                schedule_id = schedule.schedule_id,
                retry_count = execution.retry_count,
                max_retries = schedule.max_retries,
                "retries exhausted"
            );
            return RetryDecision::None;
        }

        let attempt = execution.retry_count + 1;
        let delay = retry_delay(schedule.base_delay(), execution.retry_count);
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let trigger_id = deferred_trigger_id(schedule.schedule_id, attempt);

        match self
            .triggers
            .register_deferred(&trigger_id, schedule.schedule_id, fire_at)
            .await
        {
            Ok(()) => {}
            // Deterministic id: a duplicate means a prior partial attempt
            // already registered this retry. Not an error.
            Err(TriggerError::AlreadyExists { .. }) => {
                info!(trigger_id, "deferred trigger already registered");
            }
            Err(other) => {
                error!(
                    execution_id = execution.execution_id,
                    trigger_id,
                    error = %other,
                    "deferred trigger registration failed; execution stays failed"
                );
                let note = format!("retry scheduling failed: {other}");
                if let Err(db_err) =
                    JobExecution::append_error(&self.pool, execution.execution_id, &note).await
                {
                    error!(
                        execution_id = execution.execution_id,
                        error = %db_err,
                        "could not record retry scheduling failure"
                    );
                }
                return RetryDecision::None;
            }
        }

        // Placeholder row for the deferred attempt; skipped when a prior
        // partial attempt already created it.
        match JobExecution::find_retry_placeholder(&self.pool, schedule.schedule_id, attempt).await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(db_err) = JobExecution::create_retry_placeholder(
                    &self.pool,
                    schedule.schedule_id,
                    attempt,
                    fire_at,
                )
                .await
                {
                    error!(
                        schedule_id = schedule.schedule_id,
                        attempt,
                        error = %db_err,
                        "could not create retry placeholder"
                    );
                    let note = format!("retry placeholder creation failed: {db_err}");
                    let _ =
                        JobExecution::append_error(&self.pool, execution.execution_id, &note).await;
                    return RetryDecision::None;
                }
            }
            Err(db_err) => {
                error!(
                    schedule_id = schedule.schedule_id,
                    attempt,
                    error = %db_err,
                    "placeholder lookup failed"
                );
                return RetryDecision::None;
            }
        }

        self.events
            .retry_scheduled(schedule.schedule_id, attempt, fire_at);
        info!(
            schedule_id = schedule.schedule_id,
            attempt,
            fire_at = %fire_at,
            delay_seconds = delay.as_secs(),
            "retry scheduled"
        );

        RetryDecision::ScheduledAt(fire_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_exactly() {
        let base = Duration::from_secs(300); // 5 minutes
        assert_eq!(retry_delay(base, 0), Duration::from_secs(300));
        assert_eq!(retry_delay(base, 1), Duration::from_secs(600));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(1200));
        assert_eq!(retry_delay(base, 3), Duration::from_secs(2400));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let base = Duration::from_secs(u64::MAX / 2);
        let delay = retry_delay(base, 40);
        assert_eq!(delay, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn negative_retry_count_is_clamped() {
        let base = Duration::from_secs(60);
        assert_eq!(retry_delay(base, -3), Duration::from_secs(60));
    }

    #[test]
    fn trigger_id_is_deterministic_per_attempt() {
        assert_eq!(deferred_trigger_id(42, 1), "retry:42:1");
        assert_eq!(deferred_trigger_id(42, 2), "retry:42:2");
        assert_eq!(deferred_trigger_id(42, 1), deferred_trigger_id(42, 1));
        assert_ne!(deferred_trigger_id(42, 1), deferred_trigger_id(43, 1));
    }
}
