//! Data layer: FromRow structs with async CRUD methods over `PgPool`.
//!
//! Every row has exactly one writer (the owning executor, pipeline worker,
//! or recovery pass); cross-row coordination lives in the concurrency guard,
//! not in this layer.

pub mod account;
pub mod execution;
pub mod orchestration_run;
pub mod schedule;
pub mod work_item;
pub mod work_item_execution;

pub use account::{Account, ProviderAccountRecord};
pub use execution::JobExecution;
pub use orchestration_run::OrchestrationRun;
pub use schedule::{JobSchedule, NewJobSchedule};
pub use work_item::{NewWorkItem, WorkItem};
pub use work_item_execution::WorkItemExecution;
