//! Persistence traits consumed by the executor.
//!
//! The engine-to-store boundary is a local transactional API; implementations
//! decide durability. Two rules matter for correctness:
//!
//! - `try_lock` must be a single atomic conditional write (lock only when
//!   unlocked or expired); it is the sole cross-node coordination primitive
//! - `update` must reject stale revisions so a concurrent modification
//!   surfaces as [`StoreError::Concurrency`] instead of a lost write
//!
//! Lock fields are owned by the lock protocol: `try_lock`/`unlock` do not
//! participate in revision checking.

use chrono::{DateTime, Utc};
use thiserror::Error;

use flowforge_core::{ExecutionId, IncidentId, JobId, ProcessInstanceId};

use crate::execution::ExecutionRef;
use crate::incident::{Incident, IncidentType};
use crate::job::Job;

/// Store error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("incident not found: {0}")]
    IncidentNotFound(IncidentId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Transient errors are retried on a later cycle and never touch a job's
    /// retry counter.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Concurrency(_) | StoreError::Storage(_))
    }
}

/// Transactional CRUD over job records plus the two acquisition primitives.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job) -> Result<JobId, StoreError>;

    fn find(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Revision-checked update. Returns the stored job with its bumped
    /// revision.
    fn update(&self, job: &Job) -> Result<Job, StoreError>;

    fn delete(&self, id: JobId) -> Result<(), StoreError>;

    /// Due, lockable, non-suspended jobs with retries remaining, ordered by
    /// `priority desc, due_date asc`, at most `max`.
    fn find_due_lockable(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Atomic conditional lock: succeeds only when the job is currently
    /// unlocked or its lease has expired. A `false` return means another
    /// node won the race, not an error.
    fn try_lock(
        &self,
        id: JobId,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clear the lock lease (no revision check).
    fn unlock(&self, id: JobId) -> Result<(), StoreError>;

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Job>, StoreError>;
}

/// CRUD over incident records.
pub trait IncidentStore: Send + Sync {
    fn insert(&self, incident: Incident) -> Result<IncidentId, StoreError>;

    fn find(&self, id: IncidentId) -> Result<Option<Incident>, StoreError>;

    fn delete(&self, id: IncidentId) -> Result<(), StoreError>;

    fn find_by_execution_and_type(
        &self,
        execution_id: ExecutionId,
        incident_type: &IncidentType,
    ) -> Result<Vec<Incident>, StoreError>;

    /// Incidents created directly from a job failure (leaf incidents).
    fn find_by_configuration(&self, job_id: JobId) -> Result<Vec<Incident>, StoreError>;

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Incident>, StoreError>;
}

/// Lookup into the engine's execution tree, as far as incident chaining
/// needs it.
pub trait ExecutionHierarchy: Send + Sync {
    fn find_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRef>, StoreError>;

    /// Root execution of a process instance (the one carrying
    /// `super_execution_id` when the instance was started by a call
    /// activity).
    ///
    /// The root execution shares its id with the process instance, so the
    /// default implementation is a plain execution lookup.
    fn find_instance_root(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Option<ExecutionRef>, StoreError> {
        self.find_execution(ExecutionId::from_uuid(*process_instance_id.as_uuid()))
    }
}
