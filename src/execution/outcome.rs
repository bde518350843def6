//! Terminal outcomes of a work-unit run.
//!
//! Explicit values instead of exception-driven control flow: retry policy
//! branches on the variant, so `Timeout` and `Cancelled` are first-class
//! rather than failure subtypes.

use serde::{Deserialize, Serialize};

use crate::state_machine::{ExecutionEvent, ExecutionState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success {
        output: String,
    },
    Failure {
        error: String,
        stack: Option<String>,
    },
    /// The wall-clock timeout elapsed before the unit finished.
    Timeout,
    /// An external cancellation signal was observed.
    Cancelled,
}

impl Outcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            stack: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The state-machine event that finalizes an execution with this
    /// outcome.
    pub fn terminal_event(&self) -> ExecutionEvent {
        match self {
            Self::Success { output } => ExecutionEvent::Complete {
                output: Some(output.clone()),
            },
            Self::Failure { error, stack } => ExecutionEvent::Fail {
                error: error.clone(),
                stack: stack.clone(),
            },
            Self::Timeout => ExecutionEvent::TimeoutExpired,
            Self::Cancelled => ExecutionEvent::Cancel,
        }
    }

    pub fn terminal_state(&self) -> ExecutionState {
        match self {
            Self::Success { .. } => ExecutionState::Completed,
            Self::Failure { .. } => ExecutionState::Failed,
            Self::Timeout => ExecutionState::Timeout,
            Self::Cancelled => ExecutionState::Cancelled,
        }
    }

    /// Whether this outcome may be handed to the retry scheduler.
    /// Cancellation is deliberate and never retried.
    pub fn is_retry_candidate(&self, retry_on_timeout: bool) -> bool {
        match self {
            Self::Failure { .. } => true,
            Self::Timeout => retry_on_timeout,
            Self::Success { .. } | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_candidacy_by_variant() {
        let failure = Outcome::failure("boom");
        assert!(failure.is_retry_candidate(false));
        assert!(failure.is_retry_candidate(true));

        assert!(!Outcome::Timeout.is_retry_candidate(false));
        assert!(Outcome::Timeout.is_retry_candidate(true));

        assert!(!Outcome::Cancelled.is_retry_candidate(true));
        assert!(!Outcome::Success {
            output: String::new()
        }
        .is_retry_candidate(true));
    }

    #[test]
    fn terminal_states_map_one_to_one() {
        assert_eq!(
            Outcome::Success {
                output: "done".into()
            }
            .terminal_state(),
            ExecutionState::Completed
        );
        assert_eq!(
            Outcome::failure("x").terminal_state(),
            ExecutionState::Failed
        );
        assert_eq!(Outcome::Timeout.terminal_state(), ExecutionState::Timeout);
        assert_eq!(
            Outcome::Cancelled.terminal_state(),
            ExecutionState::Cancelled
        );
    }
}
