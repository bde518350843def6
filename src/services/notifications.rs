//! Fire-and-forget notification seam.
//!
//! Rendering and delivery (mail, chat) live outside this crate; the core
//! only reports `(execution_id, is_success)` and run summaries. Sink
//! failures are the sink's problem: implementations log and swallow, so
//! notification trouble can never fail an execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub correlation_id: Uuid,
    pub state: String,
    pub processed_items: i32,
    pub total_items: i32,
    pub warning: Option<String>,
    pub failure_note: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_execution(&self, execution_id: i64, is_success: bool);

    async fn notify_run_summary(&self, summary: &RunSummary);
}

/// Default sink: structured log lines only. Deployments bridge these to
/// their alerting of choice by subscribing a real sink.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify_execution(&self, execution_id: i64, is_success: bool) {
        if is_success {
            info!(execution_id, "execution succeeded");
        } else {
            warn!(execution_id, "execution failed terminally");
        }
    }

    async fn notify_run_summary(&self, summary: &RunSummary) {
        info!(
            run_id = summary.run_id,
            correlation_id = %summary.correlation_id,
            state = %summary.state,
            processed = summary.processed_items,
            total = summary.total_items,
            warning = summary.warning.as_deref(),
            "orchestration run summary"
        );
    }
}
