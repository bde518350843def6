//! Multi-phase orchestration: pipeline, admission guard, recovery, and the
//! bounded-concurrency worker pool.

pub mod call_processor;
pub mod cleanup;
pub mod credential_verifier;
pub mod guard;
pub mod pipeline;
pub mod recovery;
pub mod status_checker;
pub mod sync_accounts;
pub mod work_item_seeder;
pub mod worker_pool;

pub use guard::{Admission, ConcurrencyGuard, GuardError};
pub use pipeline::{OrchestrationPipeline, PhaseError, PipelineError, RunMode, RunOutcome};
pub use recovery::{RecoveryReport, RecoveryService};
pub use sync_accounts::{counts_reconcile, AccountSynchronizer, SyncReport};
pub use work_item_seeder::{classify_due, DueStatus, WorkItemSeeder};
pub use worker_pool::{ItemOutcome, ItemResult, PoolProgress, PoolRunReport, WorkerPool};
