//! State machine and pipeline-ordering tests that need no database.

use billrun_core::execution::Outcome;
use billrun_core::orchestration::{classify_due, counts_reconcile, DueStatus};
use billrun_core::state_machine::{
    events::ExecutionEvent, ExecutionState, ExecutionStateMachine, OrchestrationPhase,
    WorkItemState,
};
use chrono::NaiveDate;

#[test]
fn execution_lifecycle_happy_path() {
    let running =
        ExecutionStateMachine::determine_target_state(ExecutionState::Scheduled, &ExecutionEvent::Start)
            .unwrap();
    assert_eq!(running, ExecutionState::Running);

    let completed = ExecutionStateMachine::determine_target_state(
        running,
        &ExecutionEvent::Complete {
            output: Some("ok".into()),
        },
    )
    .unwrap();
    assert_eq!(completed, ExecutionState::Completed);
    assert!(completed.is_terminal());
}

#[test]
fn retry_placeholder_becomes_a_running_attempt() {
    let running = ExecutionStateMachine::determine_target_state(
        ExecutionState::Retrying,
        &ExecutionEvent::Start,
    )
    .unwrap();
    assert_eq!(running, ExecutionState::Running);
}

#[test]
fn timeout_and_failure_are_distinct_terminal_states() {
    assert_eq!(Outcome::Timeout.terminal_state(), ExecutionState::Timeout);
    assert_eq!(
        Outcome::failure("boom").terminal_state(),
        ExecutionState::Failed
    );
    assert_ne!(
        Outcome::Timeout.terminal_state(),
        Outcome::failure("boom").terminal_state()
    );
}

#[test]
fn terminal_rows_reject_further_events() {
    for state in [
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Timeout,
        ExecutionState::Cancelled,
    ] {
        for event in [
            ExecutionEvent::Start,
            ExecutionEvent::Complete { output: None },
            ExecutionEvent::TimeoutExpired,
            ExecutionEvent::Cancel,
        ] {
            assert!(
                ExecutionStateMachine::determine_target_state(state, &event).is_err(),
                "{state} should reject {event:?}"
            );
        }
    }
}

#[test]
fn phases_execute_in_fixed_order() {
    assert_eq!(
        OrchestrationPhase::ALL.to_vec(),
        vec![
            OrchestrationPhase::SyncAccounts,
            OrchestrationPhase::CreateWorkItems,
            OrchestrationPhase::VerifyCredentials,
            OrchestrationPhase::ProcessCalls,
            OrchestrationPhase::CheckStatuses,
            OrchestrationPhase::Cleanup,
        ]
    );
}

#[test]
fn resume_from_recorded_phase_skips_finished_phases() {
    // A run interrupted in ProcessCalls resumes there, not from the top.
    let remaining = OrchestrationPhase::ProcessCalls.remaining();
    assert!(!remaining.contains(&OrchestrationPhase::SyncAccounts));
    assert!(!remaining.contains(&OrchestrationPhase::VerifyCredentials));
    assert_eq!(remaining.first(), Some(&OrchestrationPhase::ProcessCalls));
    assert_eq!(remaining.last(), Some(&OrchestrationPhase::Cleanup));
}

#[test]
fn sweepable_states_match_cleanup_contract() {
    assert!(WorkItemState::Pending.is_sweepable());
    assert!(WorkItemState::CredentialCheckInProgress.is_sweepable());
    assert!(!WorkItemState::CredentialVerified.is_sweepable());
    assert!(!WorkItemState::CallSubmitted.is_sweepable());
    assert!(!WorkItemState::NeedsReview.is_sweepable());
}

#[test]
fn sync_mismatch_skips_the_sweep() {
    // 9,995 of 10,000 fetched after a page failure: no deletions.
    assert!(!counts_reconcile(9_995, Some(10_000), true));
    // Clean full fetch: sweep allowed.
    assert!(counts_reconcile(10_000, Some(10_000), false));
}

#[test]
fn due_classification_scenarios() {
    let today = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();

    // Never retrieved: run now.
    assert_eq!(classify_due(None, today, 5), DueStatus::RunNow);
    // Two periods behind: run now.
    assert_eq!(classify_due(Some("2026-05"), today, 5), DueStatus::RunNow);
    // Caught up through July, early August: not due yet.
    assert_eq!(classify_due(Some("2026-07"), today, 5), DueStatus::NotDue);
    // Caught up through July, late August: due soon.
    let late = NaiveDate::from_ymd_opt(2026, 8, 29).unwrap();
    assert_eq!(classify_due(Some("2026-07"), late, 5), DueStatus::DueSoon);
    // Current period already done: nothing to do.
    assert_eq!(classify_due(Some("2026-08"), late, 5), DueStatus::NotDue);
}
