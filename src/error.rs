//! Crate-level error type aggregating component errors.
//!
//! Components define their own `thiserror` enums next to their code; this
//! module folds them into a single `BillrunError` for callers that sit above
//! the component boundaries (bootstrap, control surface, tests).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillrunError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigLoadError),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::execution::ExecutorError),

    #[error("Trigger registry error: {0}")]
    Trigger(#[from] crate::scheduler::TriggerError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] crate::orchestration::PipelineError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] crate::state_machine::StateMachineError),

    #[error("Provider client error: {0}")]
    Provider(#[from] crate::clients::ClientError),
}

pub type Result<T> = std::result::Result<T, BillrunError>;
