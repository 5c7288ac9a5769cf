//! `flowforge-executor` — the asynchronous job executor.
//!
//! ## Design
//!
//! - One acquisition thread per named acquisition discovers due jobs and
//!   takes their lease via the store's atomic conditional lock
//! - One bounded worker pool is shared by every registered engine; a full
//!   queue drops the submission and the job comes back when its lease
//!   expires (backpressure without local buffering)
//! - Exclusive jobs of one process instance are serialized in-process so
//!   sibling jobs never fight over the store's optimistic lock
//! - Exhausted retries escalate through the engine's incident manager
//!
//! ## Components
//!
//! - `JobAcquisitionStrategy`: pure per-cycle planning (sequential or
//!   simultaneous) and backoff
//! - `AcquireJobsRunnable` / `JobAcquisition`: the polling loop and its
//!   thread
//! - `WorkerPool`: bounded queue + fixed worker threads
//! - `ExclusiveJobTable`: per-instance execution slots
//! - `JobExecutionRunnable`: runs one locked job, handles failure inline
//! - `JobExecutor`: registry, lifecycle, and the shared pool

pub mod acquisition;
pub mod config;
pub mod exclusive;
pub mod executor;
pub mod pool;
pub mod runnable;
pub mod strategy;

#[cfg(test)]
mod integration_tests;

pub use acquisition::{
    AcquireJobsRunnable, AcquisitionState, AcquisitionStats, JobAcquisition,
};
pub use config::{AcquisitionConfig, AcquisitionStrategyKind, ExecutorConfig};
pub use exclusive::{ExclusiveJobTable, ExclusiveSlot};
pub use executor::{BoundEngine, ExecutorError, ExecutorStats, JobExecutor};
pub use pool::{SubmitError, WorkerPool};
pub use runnable::JobExecutionRunnable;
pub use strategy::{AcquisitionRequest, EngineCycleReport, JobAcquisitionStrategy};
