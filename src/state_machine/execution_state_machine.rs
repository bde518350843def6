use sqlx::PgPool;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ExecutionEvent,
    states::ExecutionState,
};
use crate::models::JobExecution;

/// State machine for one execution attempt.
///
/// Owns every state write for its row: the single-writer rule for execution
/// rows is enforced by routing all mutations through the machine that holds
/// the row. Retries never pass through here; a retry is a fresh row with its
/// own machine.
pub struct ExecutionStateMachine {
    execution: JobExecution,
    pool: PgPool,
    /// Actor recorded when this machine starts the attempt.
    actor: String,
}

impl ExecutionStateMachine {
    pub fn new(execution: JobExecution, pool: PgPool, actor: impl Into<String>) -> Self {
        Self {
            execution,
            pool,
            actor: actor.into(),
        }
    }

    pub fn current_state(&self) -> StateMachineResult<ExecutionState> {
        self.execution
            .state
            .parse()
            .map_err(StateMachineError::InvalidStateValue)
    }

    /// Apply an event, persisting the resulting state on the row.
    pub async fn transition(&mut self, event: ExecutionEvent) -> StateMachineResult<ExecutionState> {
        let current = self.current_state()?;

        if current.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal(
                self.execution.execution_id,
            ));
        }

        let target = Self::determine_target_state(current, &event)?;
        let id = self.execution.execution_id;

        let updated = match &event {
            ExecutionEvent::Start => {
                JobExecution::promote_to_running(&self.pool, id, &self.actor).await?
            }
            ExecutionEvent::Complete { output } => {
                JobExecution::finalize(&self.pool, id, "completed", output.as_deref(), None, None)
                    .await?
            }
            ExecutionEvent::Fail { error, stack } => {
                JobExecution::finalize(&self.pool, id, "failed", None, Some(error), stack.as_deref())
                    .await?
            }
            ExecutionEvent::TimeoutExpired => {
                JobExecution::finalize(
                    &self.pool,
                    id,
                    "timeout",
                    None,
                    Some("execution exceeded its wall-clock timeout"),
                    None,
                )
                .await?
            }
            ExecutionEvent::Cancel => {
                if current == ExecutionState::Running {
                    JobExecution::finalize(
                        &self.pool,
                        id,
                        "cancelled",
                        None,
                        Some("cancelled by external signal"),
                        None,
                    )
                    .await?
                } else {
                    JobExecution::cancel_placeholder(&self.pool, id).await?;
                    JobExecution::find_by_id(&self.pool, id).await?
                }
            }
        };

        match updated {
            Some(row) => {
                self.execution = row;
                Ok(target)
            }
            // The guarded UPDATE matched nothing: someone else finalized the
            // row first. Single-writer discipline makes this a bug upstream.
            None => Err(StateMachineError::AlreadyTerminal(id)),
        }
    }

    /// Transition table. Pure so the legality rules are testable without a
    /// database.
    pub fn determine_target_state(
        current: ExecutionState,
        event: &ExecutionEvent,
    ) -> StateMachineResult<ExecutionState> {
        use ExecutionState::*;

        let target = match (current, event) {
            (Scheduled, ExecutionEvent::Start) => Running,
            (Retrying, ExecutionEvent::Start) => Running,

            (Running, ExecutionEvent::Complete { .. }) => Completed,
            (Running, ExecutionEvent::Fail { .. }) => Failed,
            (Running, ExecutionEvent::TimeoutExpired) => Timeout,

            (Scheduled, ExecutionEvent::Cancel)
            | (Retrying, ExecutionEvent::Cancel)
            | (Running, ExecutionEvent::Cancel) => Cancelled,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        Ok(target)
    }

    pub fn execution(&self) -> &JobExecution {
        &self.execution
    }

    pub fn execution_id(&self) -> i64 {
        self.execution.execution_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert_eq!(
            ExecutionStateMachine::determine_target_state(
                ExecutionState::Scheduled,
                &ExecutionEvent::Start
            )
            .unwrap(),
            ExecutionState::Running
        );
        assert_eq!(
            ExecutionStateMachine::determine_target_state(
                ExecutionState::Retrying,
                &ExecutionEvent::Start
            )
            .unwrap(),
            ExecutionState::Running
        );
        assert_eq!(
            ExecutionStateMachine::determine_target_state(
                ExecutionState::Running,
                &ExecutionEvent::Complete { output: None }
            )
            .unwrap(),
            ExecutionState::Completed
        );
        assert_eq!(
            ExecutionStateMachine::determine_target_state(
                ExecutionState::Running,
                &ExecutionEvent::TimeoutExpired
            )
            .unwrap(),
            ExecutionState::Timeout
        );
    }

    #[test]
    fn timeout_is_not_failure() {
        let timeout = ExecutionStateMachine::determine_target_state(
            ExecutionState::Running,
            &ExecutionEvent::TimeoutExpired,
        )
        .unwrap();
        let failure = ExecutionStateMachine::determine_target_state(
            ExecutionState::Running,
            &ExecutionEvent::Fail {
                error: "boom".to_string(),
                stack: None,
            },
        )
        .unwrap();
        assert_ne!(timeout, failure);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        // A running attempt cannot start again.
        assert!(ExecutionStateMachine::determine_target_state(
            ExecutionState::Running,
            &ExecutionEvent::Start
        )
        .is_err());

        // A scheduled attempt cannot complete without running.
        assert!(ExecutionStateMachine::determine_target_state(
            ExecutionState::Scheduled,
            &ExecutionEvent::Complete { output: None }
        )
        .is_err());

        // Terminal states admit nothing.
        assert!(ExecutionStateMachine::determine_target_state(
            ExecutionState::Completed,
            &ExecutionEvent::Cancel
        )
        .is_err());
    }

    #[test]
    fn cancel_is_allowed_from_every_non_terminal_state() {
        for state in [
            ExecutionState::Scheduled,
            ExecutionState::Retrying,
            ExecutionState::Running,
        ] {
            assert_eq!(
                ExecutionStateMachine::determine_target_state(state, &ExecutionEvent::Cancel)
                    .unwrap(),
                ExecutionState::Cancelled
            );
        }
    }
}
