#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Billrun Core
//!
//! Scheduling and orchestration core for recurring billing-data
//! acquisition: runs configured work units (process launches, HTTP calls,
//! stored procedures) on recurring and on-demand triggers, and drives a
//! multi-phase batch pipeline that synchronizes provider accounts, creates
//! per-account work items, verifies credentials, performs the
//! charge-incurring retrieval call, and checks completion status across
//! very large account populations.
//!
//! ## Architecture
//!
//! Two layers share one execution substrate. The **work-unit executor**
//! runs a single schedule attempt under a wall-clock timeout and finalizes
//! it through an explicit state machine; failed attempts flow into the
//! **retry scheduler**, which registers collision-safe deferred
//! re-invocations with exact exponential delays. The **orchestration
//! pipeline** sequences six phases over the account population under a
//! single durable run record, with a concurrency guard enforcing at most
//! one active run (in-process slot + durable row check) and a recovery
//! service that finalizes whatever a crash left behind.
//!
//! The billable retrieval call is protected twice: work items are unique
//! per `(account, period)`, and the execution ledger is consulted before
//! every submission so a crash-and-rerun never bills the same period
//! twice.
//!
//! ## Module Organization
//!
//! - [`models`] - Data layer over PostgreSQL (schedules, executions, work
//!   items, phase calls, orchestration runs)
//! - [`state_machine`] - Execution/work-item/run state definitions and the
//!   execution transition table
//! - [`execution`] - Work-unit dispatch, timeout enforcement, the executor
//! - [`scheduler`] - Retry decisions and the trigger-registry seam
//! - [`ledger`] - Append-only attempt history and the idempotency checks
//! - [`orchestration`] - Pipeline phases, concurrency guard, worker pool,
//!   recovery
//! - [`clients`] - Outbound provider interfaces (HTTP implementation
//!   included)
//! - [`services`] - Control surface, archival, notifications
//! - [`config`] / [`logging`] / [`events`] - Ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use billrun_core::bootstrap::BillrunSystem;
//! use billrun_core::config::BillrunConfig;
//!
//! # async fn example() -> billrun_core::Result<()> {
//! let config = BillrunConfig::load()?;
//! let system = BillrunSystem::bootstrap(config).await?;
//!
//! // Startup recovery finalizes runs a crash left behind.
//! system.spawn_startup_recovery();
//!
//! // Queue a background orchestration run.
//! let outcome = system.control.queue_orchestration().await;
//! println!("queued: {outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod execution;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod scheduler;
pub mod services;
pub mod state_machine;

pub use config::BillrunConfig;
pub use error::{BillrunError, Result};
pub use execution::{ExecuteResult, Outcome, TriggerSource, WorkUnitExecutor};
pub use ledger::ExecutionLedger;
pub use orchestration::{
    ConcurrencyGuard, OrchestrationPipeline, RecoveryService, RunMode, RunOutcome, WorkerPool,
};
pub use scheduler::{RetryDecision, RetryScheduler};
pub use state_machine::{
    CallPhase, ExecutionState, OrchestrationPhase, RunState, WorkItemState,
};
