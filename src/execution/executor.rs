//! The work-unit executor: loads a schedule, runs its unit with a wall-clock
//! timeout, and finalizes the attempt through the state machine.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::outcome::Outcome;
use super::work_unit::{JobSpec, UnitContext};
use crate::config::ExecutorConfig;
use crate::events::EventPublisher;
use crate::models::{JobExecution, JobSchedule};
use crate::scheduler::{RetryDecision, RetryScheduler, TriggerRegistry};
use crate::services::notifications::NotificationSink;
use crate::state_machine::{ExecutionEvent, ExecutionStateMachine, StateMachineError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

/// What caused this attempt. Recorded on the execution row and used to
/// decide whether the next automatic fire time is recalculated: manual
/// triggers never advance it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Cron,
    Manual { actor: String },
    Retry { attempt: i32 },
}

impl TriggerSource {
    pub fn actor_label(&self) -> String {
        match self {
            Self::Cron => "cron".to_string(),
            Self::Manual { actor } => format!("manual:{actor}"),
            Self::Retry { attempt } => format!("retry:{attempt}"),
        }
    }

    fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

/// Result of an execute call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    Ran {
        execution_id: i64,
        outcome: Outcome,
    },
    /// Schedule disabled: rejected with a no-op, no execution row created.
    SkippedDisabled,
    /// Schedule soft-deleted: same no-op treatment.
    SkippedDeleted,
}

pub struct WorkUnitExecutor {
    pool: PgPool,
    http: reqwest::Client,
    triggers: Arc<dyn TriggerRegistry>,
    retry: RetryScheduler,
    notifier: Arc<dyn NotificationSink>,
    events: EventPublisher,
    config: ExecutorConfig,
}

impl WorkUnitExecutor {
    pub fn new(
        pool: PgPool,
        triggers: Arc<dyn TriggerRegistry>,
        retry: RetryScheduler,
        notifier: Arc<dyn NotificationSink>,
        events: EventPublisher,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            http: reqwest::Client::new(),
            triggers,
            retry,
            notifier,
            events,
            config,
        }
    }

    pub async fn execute(
        &self,
        schedule_id: i64,
        source: TriggerSource,
    ) -> Result<ExecuteResult, ExecutorError> {
        self.execute_with_cancellation(schedule_id, source, CancellationToken::new())
            .await
    }

    /// Run one attempt of a schedule. The attempt is finalized in exactly
    /// one terminal state; failure/timeout outcomes are handed to the retry
    /// scheduler afterwards.
    pub async fn execute_with_cancellation(
        &self,
        schedule_id: i64,
        source: TriggerSource,
        cancel: CancellationToken,
    ) -> Result<ExecuteResult, ExecutorError> {
        let schedule = JobSchedule::find_by_id(&self.pool, schedule_id)
            .await?
            .ok_or(ExecutorError::ScheduleNotFound(schedule_id))?;

        if schedule.deleted_at.is_some() {
            info!(schedule_id, "skipping soft-deleted schedule");
            return Ok(ExecuteResult::SkippedDeleted);
        }
        if !schedule.enabled {
            info!(schedule_id, "skipping disabled schedule");
            return Ok(ExecuteResult::SkippedDisabled);
        }

        let actor = source.actor_label();
        let mut machine = self.open_attempt(&schedule, &source, &actor).await?;
        let execution_id = machine.execution_id();
        let retry_count = machine.execution().retry_count;

        self.events
            .execution_started(execution_id, schedule_id, &actor);
        info!(
            execution_id,
            schedule_id,
            retry_count,
            triggered_by = %actor,
            job_kind = %schedule.job_kind,
            "execution started"
        );

        let outcome = match JobSpec::parse(&schedule.job_kind, &schedule.job_config) {
            Ok(spec) => self.run_unit(spec, &schedule, &cancel).await,
            Err(config_err) => Outcome::failure(config_err.to_string()),
        };

        machine.transition(outcome.terminal_event()).await?;
        self.events
            .execution_finished(execution_id, schedule_id, &machine.execution().state);
        info!(
            execution_id,
            schedule_id,
            state = %machine.execution().state,
            "execution finished"
        );

        self.settle_attempt(&schedule, machine.execution(), &outcome)
            .await;

        // Next-fire recalculation happens only for automatic runs; a manual
        // trigger must not advance the schedule's automatic next fire time.
        if !source.is_manual() {
            if let Err(e) = self.triggers.refresh_next_fire(schedule_id).await {
                warn!(schedule_id, error = %e, "next-fire recalculation failed");
            }
        }

        Ok(ExecuteResult::Ran {
            execution_id,
            outcome,
        })
    }

    /// Create or adopt the execution row for this attempt. Retry triggers
    /// promote their placeholder; everything else opens a fresh `running`
    /// row.
    async fn open_attempt(
        &self,
        schedule: &JobSchedule,
        source: &TriggerSource,
        actor: &str,
    ) -> Result<ExecutionStateMachine, ExecutorError> {
        let execution = match source {
            TriggerSource::Retry { attempt } => {
                match JobExecution::find_retry_placeholder(&self.pool, schedule.schedule_id, *attempt)
                    .await?
                {
                    Some(placeholder) => {
                        let mut machine =
                            ExecutionStateMachine::new(placeholder, self.pool.clone(), actor);
                        machine.transition(ExecutionEvent::Start).await?;
                        return Ok(machine);
                    }
                    // Placeholder lost (e.g. pruned); run the attempt anyway
                    // with the right retry count so the chain stays intact.
                    None => {
                        warn!(
                            schedule_id = schedule.schedule_id,
                            attempt, "retry placeholder missing; opening fresh attempt row"
                        );
                        JobExecution::start(&self.pool, schedule.schedule_id, *attempt, actor)
                            .await?
                    }
                }
            }
            _ => JobExecution::start(&self.pool, schedule.schedule_id, 0, actor).await?,
        };
        Ok(ExecutionStateMachine::new(
            execution,
            self.pool.clone(),
            actor,
        ))
    }

    async fn run_unit(
        &self,
        spec: JobSpec,
        schedule: &JobSchedule,
        cancel: &CancellationToken,
    ) -> Outcome {
        let timeout = schedule.effective_timeout(&self.config);
        let ctx = UnitContext {
            pool: self.pool.clone(),
            http: self.http.clone(),
            cancel: cancel.clone(),
        };
        let unit = spec.into_unit();

        tokio::select! {
            _ = cancel.cancelled() => Outcome::Cancelled,
            finished = tokio::time::timeout(timeout, unit.run(&ctx)) => {
                // On timeout the unit future is dropped; process jobs are
                // force-killed via kill_on_drop, other kinds simply stop
                // being polled at their next await point.
                finished.unwrap_or(Outcome::Timeout)
            }
        }
    }

    /// Post-terminal handling: retry scheduling and notifications.
    async fn settle_attempt(
        &self,
        schedule: &JobSchedule,
        execution: &JobExecution,
        outcome: &Outcome,
    ) {
        if outcome.is_success() {
            self.notifier
                .notify_execution(execution.execution_id, true)
                .await;
            return;
        }

        // Cancellation is deliberate; it is neither retried nor alerted on.
        if matches!(outcome, Outcome::Cancelled) {
            return;
        }

        if outcome.is_retry_candidate(self.config.retry_on_timeout) {
            match self.retry.maybe_schedule_retry(execution, schedule).await {
                RetryDecision::ScheduledAt(fire_at) => {
                    info!(
                        execution_id = execution.execution_id,
                        fire_at = %fire_at,
                        "attempt will be retried"
                    );
                    return;
                }
                RetryDecision::None => {}
            }
        }

        // Terminal failure: retries exhausted, not eligible, or scheduling
        // itself failed.
        self.notifier
            .notify_execution(execution.execution_id, false)
            .await;
    }
}
