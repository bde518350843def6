use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution attempt lifecycle.
///
/// `Retrying` rows are placeholders created by the retry scheduler; a fired
/// deferred trigger promotes them to `Running`. A retry is always a new row,
/// never a reused one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created for an attempt that has not started yet
    Scheduled,
    /// Deferred retry placeholder awaiting its trigger
    Retrying,
    /// Attempt is currently executing
    Running,
    /// Attempt finished successfully
    Completed,
    /// Attempt failed with an error
    Failed,
    /// Attempt exceeded its wall-clock timeout
    Timeout,
    /// Attempt was cancelled by an external signal
    Cancelled,
}

impl ExecutionState {
    /// Terminal states admit no further transitions (archival soft-delete
    /// excepted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// States eligible for retry scheduling.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retrying => write!(f, "retrying"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "retrying" => Ok(Self::Retrying),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

/// Work item phase status as it advances through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    /// Created, waiting for credential verification
    Pending,
    /// Credential verification in flight
    CredentialCheckInProgress,
    /// Credentials verified, eligible for the billable call
    CredentialVerified,
    /// Credential verification failed
    CredentialFailed,
    /// Billable call accepted by the provider, awaiting completion
    CallSubmitted,
    /// Provider reported the call complete
    Completed,
    /// Call or status check failed
    Failed,
    /// Finalized by the staleness sweep, requires operator attention
    NeedsReview,
}

impl WorkItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CredentialFailed | Self::Completed | Self::Failed | Self::NeedsReview
        )
    }

    /// States the staleness sweep may finalize.
    pub fn is_sweepable(&self) -> bool {
        matches!(self, Self::Pending | Self::CredentialCheckInProgress)
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::CredentialCheckInProgress => write!(f, "credential_check_in_progress"),
            Self::CredentialVerified => write!(f, "credential_verified"),
            Self::CredentialFailed => write!(f, "credential_failed"),
            Self::CallSubmitted => write!(f, "call_submitted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::NeedsReview => write!(f, "needs_review"),
        }
    }
}

impl std::str::FromStr for WorkItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "credential_check_in_progress" => Ok(Self::CredentialCheckInProgress),
            "credential_verified" => Ok(Self::CredentialVerified),
            "credential_failed" => Ok(Self::CredentialFailed),
            "call_submitted" => Ok(Self::CallSubmitted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "needs_review" => Ok(Self::NeedsReview),
            _ => Err(format!("Invalid work item state: {s}")),
        }
    }
}

/// Orchestration run status. At most one run may be non-terminal at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// Ordered phases of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPhase {
    SyncAccounts,
    CreateWorkItems,
    VerifyCredentials,
    ProcessCalls,
    CheckStatuses,
    Cleanup,
}

impl OrchestrationPhase {
    pub const ALL: [OrchestrationPhase; 6] = [
        Self::SyncAccounts,
        Self::CreateWorkItems,
        Self::VerifyCredentials,
        Self::ProcessCalls,
        Self::CheckStatuses,
        Self::Cleanup,
    ];

    /// The phase following this one, if any.
    pub fn next(&self) -> Option<OrchestrationPhase> {
        let index = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Phases from this one to the end, in order. Used when resuming an
    /// interrupted run from its recorded phase.
    pub fn remaining(&self) -> Vec<OrchestrationPhase> {
        let index = Self::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or(Self::ALL.len());
        Self::ALL[index..].to_vec()
    }
}

impl fmt::Display for OrchestrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncAccounts => write!(f, "sync_accounts"),
            Self::CreateWorkItems => write!(f, "create_work_items"),
            Self::VerifyCredentials => write!(f, "verify_credentials"),
            Self::ProcessCalls => write!(f, "process_calls"),
            Self::CheckStatuses => write!(f, "check_statuses"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

impl std::str::FromStr for OrchestrationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_accounts" => Ok(Self::SyncAccounts),
            "create_work_items" => Ok(Self::CreateWorkItems),
            "verify_credentials" => Ok(Self::VerifyCredentials),
            "process_calls" => Ok(Self::ProcessCalls),
            "check_statuses" => Ok(Self::CheckStatuses),
            "cleanup" => Ok(Self::Cleanup),
            _ => Err(format!("Invalid orchestration phase: {s}")),
        }
    }
}

/// Per-item call phases recorded in the idempotency ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    CredentialCheck,
    ScrapeCall,
    StatusCheck,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialCheck => write!(f, "credential_check"),
            Self::ScrapeCall => write!(f, "scrape_call"),
            Self::StatusCheck => write!(f, "status_check"),
        }
    }
}

impl std::str::FromStr for CallPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential_check" => Ok(Self::CredentialCheck),
            "scrape_call" => Ok(Self::ScrapeCall),
            "status_check" => Ok(Self::StatusCheck),
            _ => Err(format!("Invalid call phase: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_terminal_states() {
        assert!(ExecutionState::Completed.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Timeout.is_terminal());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(!ExecutionState::Scheduled.is_terminal());
        assert!(!ExecutionState::Retrying.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
    }

    #[test]
    fn retry_eligibility_distinguishes_timeout_from_cancel() {
        assert!(ExecutionState::Failed.is_retry_eligible());
        assert!(ExecutionState::Timeout.is_retry_eligible());
        assert!(!ExecutionState::Cancelled.is_retry_eligible());
        assert!(!ExecutionState::Completed.is_retry_eligible());
    }

    #[test]
    fn work_item_sweepable_states() {
        assert!(WorkItemState::Pending.is_sweepable());
        assert!(WorkItemState::CredentialCheckInProgress.is_sweepable());
        assert!(!WorkItemState::CallSubmitted.is_sweepable());
        assert!(!WorkItemState::Completed.is_sweepable());
    }

    #[test]
    fn phase_ordering_is_strict() {
        assert_eq!(
            OrchestrationPhase::SyncAccounts.next(),
            Some(OrchestrationPhase::CreateWorkItems)
        );
        assert_eq!(OrchestrationPhase::Cleanup.next(), None);

        let from_calls = OrchestrationPhase::ProcessCalls.remaining();
        assert_eq!(
            from_calls,
            vec![
                OrchestrationPhase::ProcessCalls,
                OrchestrationPhase::CheckStatuses,
                OrchestrationPhase::Cleanup,
            ]
        );
    }

    #[test]
    fn state_string_round_trips() {
        assert_eq!(ExecutionState::Timeout.to_string(), "timeout");
        assert_eq!(
            "retrying".parse::<ExecutionState>().unwrap(),
            ExecutionState::Retrying
        );
        assert_eq!(
            "credential_check_in_progress"
                .parse::<WorkItemState>()
                .unwrap(),
            WorkItemState::CredentialCheckInProgress
        );
        assert_eq!(
            "process_calls".parse::<OrchestrationPhase>().unwrap(),
            OrchestrationPhase::ProcessCalls
        );
        assert_eq!(
            "scrape_call".parse::<CallPhase>().unwrap(),
            CallPhase::ScrapeCall
        );
    }

    #[test]
    fn run_state_serde_uses_snake_case() {
        let json = serde_json::to_string(&RunState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RunState::Running);
    }
}
