//! System-wide constants and defaults.

/// Default worker count for bounded-concurrency orchestration phases.
pub const DEFAULT_WORKER_COUNT: usize = 15;

/// Default page size when syncing provider accounts.
pub const DEFAULT_SYNC_PAGE_SIZE: u32 = 500;

/// Prefix for deterministic deferred retry trigger identifiers.
pub const RETRY_TRIGGER_PREFIX: &str = "retry";

/// Billing periods are rendered as `YYYY-MM`.
pub const PERIOD_FORMAT: &str = "%Y-%m";

/// Per-job-kind default execution timeouts, applied when a schedule does not
/// carry its own timeout.
pub mod default_timeouts {
    use std::time::Duration;

    pub const PROCESS_LAUNCH: Duration = Duration::from_secs(15 * 60);
    pub const HTTP_CALL: Duration = Duration::from_secs(2 * 60);
    pub const STORED_PROCEDURE: Duration = Duration::from_secs(10 * 60);
    pub const ARCHIVAL: Duration = Duration::from_secs(30 * 60);
}

/// Lifecycle event names published on the event bus.
pub mod events {
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_FINISHED: &str = "execution.finished";
    pub const EXECUTION_RETRY_SCHEDULED: &str = "execution.retry_scheduled";
    pub const RUN_QUEUED: &str = "orchestration.run_queued";
    pub const RUN_PHASE_CHANGED: &str = "orchestration.phase_changed";
    pub const RUN_FINISHED: &str = "orchestration.run_finished";
    pub const RUN_RECOVERED: &str = "orchestration.run_recovered";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_are_positive() {
        assert!(default_timeouts::PROCESS_LAUNCH.as_secs() > 0);
        assert!(default_timeouts::HTTP_CALL.as_secs() > 0);
        assert!(default_timeouts::STORED_PROCEDURE.as_secs() > 0);
        assert!(default_timeouts::ARCHIVAL.as_secs() > 0);
    }
}
