//! Work-unit execution: job-kind dispatch, timeout enforcement, and
//! terminal outcome handling.

pub mod executor;
pub mod http_unit;
pub mod outcome;
pub mod procedure_unit;
pub mod process_unit;
pub mod work_unit;

pub use executor::{ExecuteResult, ExecutorError, TriggerSource, WorkUnitExecutor};
pub use outcome::Outcome;
pub use work_unit::{JobConfigError, JobSpec, UnitContext, WorkUnit};
