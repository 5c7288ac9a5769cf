//! The schedulable unit of deferred work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowforge_core::{
    ExecutionId, JobId, ProcessDefinitionId, ProcessInstanceId, TenantId,
};

use crate::execution::ExecutionRef;

/// Retries a freshly created job starts with.
pub const DEFAULT_RETRIES: u32 = 3;

/// A persisted, lockable unit of deferred asynchronous work.
///
/// A job is acquirable by at most one worker at a time; the store's
/// conditional lock update (`lock_owner`/`lock_expiration_time` as a lease)
/// enforces this across nodes. A job whose retries reached zero is inert
/// until an operator resets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Discriminates the payload handler
    pub job_type: String,
    /// JSON payload handed to the handler
    pub payload: serde_json::Value,
    /// When the job becomes due; `None` means due immediately (message job)
    pub due_date: Option<DateTime<Utc>>,
    /// Higher executes first
    pub priority: i64,
    /// Lease holder token, `None` when unlocked
    pub lock_owner: Option<String>,
    /// Lease end; an expired lease makes the job lockable again
    pub lock_expiration_time: Option<DateTime<Utc>>,
    /// Remaining attempts
    pub retries: u32,
    /// Message of the last handler failure
    pub exception_message: Option<String>,
    /// Stack trace of the last handler failure
    pub exception_stack_trace: Option<String>,
    /// Execution this job belongs to
    pub execution_id: Option<ExecutionId>,
    /// Process instance this job belongs to
    pub process_instance_id: Option<ProcessInstanceId>,
    /// Definition of the owning process
    pub process_definition_id: Option<ProcessDefinitionId>,
    /// Tenant scope
    pub tenant_id: Option<TenantId>,
    /// Serialize execution against sibling jobs of the same process instance
    pub exclusive: bool,
    /// Suspended jobs are excluded from acquisition but not deleted
    pub suspended: bool,
    /// Recurring timers: reschedule with this interval instead of deleting
    pub repeat_interval: Option<Duration>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on update
    pub revision: u64,
}

impl Job {
    /// Create a new job due immediately.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            due_date: None,
            priority: 0,
            lock_owner: None,
            lock_expiration_time: None,
            retries: DEFAULT_RETRIES,
            exception_message: None,
            exception_stack_trace: None,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            tenant_id: None,
            exclusive: false,
            suspended: false,
            repeat_interval: None,
            created_at: Utc::now(),
            revision: 0,
        }
    }

    /// Make the job due at a specific time (timer job).
    pub fn due_at(mut self, at: DateTime<Utc>) -> Self {
        self.due_date = Some(at);
        self
    }

    /// Make the job due after a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.due_date =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Serialize execution against sibling jobs of the same process instance.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Turn the job into a recurring timer.
    pub fn repeating(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    /// Attach the job to an execution (copies the correlation ids).
    pub fn on_execution(mut self, execution: &ExecutionRef) -> Self {
        self.execution_id = Some(execution.id);
        self.process_instance_id = Some(execution.process_instance_id);
        self.process_definition_id = execution.process_definition_id;
        if self.tenant_id.is_none() {
            self.tenant_id = execution.tenant_id;
        }
        self
    }

    /// A job is due when it has no due date or the due date has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(at) => at <= now,
            None => true,
        }
    }

    /// A job is lockable when unlocked or its lease has expired.
    pub fn is_lockable(&self, now: DateTime<Utc>) -> bool {
        match (&self.lock_owner, self.lock_expiration_time) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires < now,
            (Some(_), None) => false,
        }
    }

    /// Acquirable: due, lockable, not suspended, retries remaining.
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        !self.suspended && self.retries > 0 && self.is_due(now) && self.is_lockable(now)
    }

    /// Take the lock lease.
    pub fn lock(&mut self, owner: impl Into<String>, until: DateTime<Utc>) {
        self.lock_owner = Some(owner.into());
        self.lock_expiration_time = Some(until);
    }

    /// Release the lock lease.
    pub fn unlock(&mut self) {
        self.lock_owner = None;
        self.lock_expiration_time = None;
    }

    /// Record a handler failure: consume one retry and capture the error.
    pub fn record_failure(&mut self, message: impl Into<String>, stack_trace: Option<String>) {
        self.retries = self.retries.saturating_sub(1);
        self.exception_message = Some(message.into());
        self.exception_stack_trace = stack_trace;
    }

    /// Reschedule a recurring timer after a successful run.
    ///
    /// Returns false when the job does not repeat.
    pub fn reschedule(&mut self, now: DateTime<Utc>, retries: u32) -> bool {
        let Some(interval) = self.repeat_interval else {
            return false;
        };
        self.due_date = Some(now + chrono::Duration::from_std(interval).unwrap_or_default());
        self.retries = retries;
        self.exception_message = None;
        self.exception_stack_trace = None;
        self.unlock();
        true
    }
}
