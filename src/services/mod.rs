//! Operational services: control surface, archival, notifications.

pub mod archival;
pub mod control;
pub mod notifications;

pub use archival::{ArchivalReport, ArchivalService};
pub use control::{ControlService, OrchestrationStatus, QueueOutcome};
pub use notifications::{LogNotificationSink, NotificationSink, RunSummary};
