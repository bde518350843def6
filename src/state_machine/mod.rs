//! State management for executions, work items, and orchestration runs.

pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExecutionEvent;
pub use execution_state_machine::ExecutionStateMachine;
pub use states::{CallPhase, ExecutionState, OrchestrationPhase, RunState, WorkItemState};
