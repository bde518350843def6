//! State machine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from:?} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Execution {0} is already terminal")]
    AlreadyTerminal(i64),

    #[error("Invalid state value in database: {0}")]
    InvalidStateValue(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
