//! Events that drive execution state transitions.

use serde::{Deserialize, Serialize};

/// An event applied to a [`super::ExecutionStateMachine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Begin executing (from `Scheduled` or a fired `Retrying` placeholder).
    Start,
    /// Work unit finished successfully with captured output.
    Complete { output: Option<String> },
    /// Work unit failed.
    Fail {
        error: String,
        stack: Option<String>,
    },
    /// Wall-clock timeout elapsed before the work unit finished.
    TimeoutExpired,
    /// External cancellation signal observed.
    Cancel,
}

impl ExecutionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::TimeoutExpired => "timeout_expired",
            Self::Cancel => "cancel",
        }
    }
}
