//! Retry scheduling and trigger registration.

pub mod retry;
pub mod triggers;

pub use retry::{deferred_trigger_id, retry_delay, RetryDecision, RetryScheduler};
pub use triggers::{InMemoryTriggerRegistry, TriggerError, TriggerRegistry};
