//! Executes exactly one locked job against its owning engine.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use flowforge_engine::{
    ExecutionRef, HandlerError, Job, JobContext, ProcessEngine, StoreError,
};

use crate::exclusive::ExclusiveJobTable;
use crate::executor::ExecutorCounters;

/// One locked job, ready to run on a worker thread.
///
/// Failure handling happens inline: a handler error consumes a retry, an
/// exhausted job escalates to the incident manager, and transient conflicts
/// put the job straight back into the acquirable pool.
pub struct JobExecutionRunnable {
    engine: Arc<ProcessEngine>,
    job: Job,
    exclusive: Arc<ExclusiveJobTable>,
    retry_backoff: Duration,
    counters: Arc<ExecutorCounters>,
}

impl JobExecutionRunnable {
    pub(crate) fn new(
        engine: Arc<ProcessEngine>,
        job: Job,
        exclusive: Arc<ExclusiveJobTable>,
        retry_backoff: Duration,
        counters: Arc<ExecutorCounters>,
    ) -> Self {
        Self {
            engine,
            job,
            exclusive,
            retry_backoff,
            counters,
        }
    }

    pub fn run(mut self) {
        // the slot guard releases on every exit path, panics included
        let exclusive = self.exclusive.clone();
        let _slot = match (self.job.exclusive, self.job.process_instance_id) {
            (true, Some(instance)) => Some(exclusive.acquire(instance)),
            _ => None,
        };

        let execution = match self.resolve_execution() {
            Ok(execution) => execution,
            Err(e) => {
                debug!(
                    job_id = %self.job.id,
                    error = %e,
                    "execution lookup failed, job returns to the acquirable pool"
                );
                self.release_for_retry();
                return;
            }
        };

        if let (Some(execution_id), None) = (self.job.execution_id, execution.as_ref()) {
            self.handle_failure(format!("execution {execution_id} not found"), None);
            return;
        }

        match self.invoke_handler(execution.as_ref()) {
            Ok(()) => self.complete(),
            Err(HandlerError::Concurrency(message)) => {
                debug!(
                    job_id = %self.job.id,
                    conflict = %message,
                    "transient conflict, job returns to the acquirable pool"
                );
                self.release_for_retry();
            }
            Err(HandlerError::Failed {
                message,
                stack_trace,
            }) => self.handle_failure(message, stack_trace),
        }
    }

    fn resolve_execution(&self) -> Result<Option<ExecutionRef>, StoreError> {
        match self.job.execution_id {
            Some(id) => self.engine.hierarchy().find_execution(id),
            None => Ok(None),
        }
    }

    fn invoke_handler(&self, execution: Option<&ExecutionRef>) -> Result<(), HandlerError> {
        let Some(handler) = self.engine.handlers().get(&self.job.job_type) else {
            return Err(HandlerError::failed(format!(
                "no handler registered for job type '{}'",
                self.job.job_type
            )));
        };

        let ctx = JobContext {
            job: &self.job,
            engine: self.engine.name(),
            execution,
            tenant_id: self.job.tenant_id.or(self.engine.tenant_id()),
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&ctx))) {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Failed {
                message: panic_message(panic.as_ref()),
                stack_trace: None,
            }),
        }
    }

    /// Success: resolve open incidents, then delete (or reschedule a
    /// recurring timer).
    fn complete(&mut self) {
        if let Err(e) = self.engine.incident_manager().resolve(&self.job) {
            warn!(
                job_id = %self.job.id,
                error = %e,
                "failed to resolve incidents after successful execution"
            );
        }

        if self.job.repeat_interval.is_some() {
            self.job.reschedule(Utc::now(), self.engine.default_retries());
            match self.engine.job_store().update(&self.job) {
                Ok(_) => debug!(job_id = %self.job.id, "recurring job rescheduled"),
                Err(StoreError::Concurrency(conflict)) => {
                    debug!(job_id = %self.job.id, %conflict, "reschedule lost a race");
                    self.release_for_retry();
                }
                Err(e) => warn!(job_id = %self.job.id, error = %e, "reschedule failed"),
            }
        } else {
            match self.engine.job_store().delete(self.job.id) {
                Ok(()) => debug!(job_id = %self.job.id, engine = %self.engine.name(), "job completed"),
                // already gone, e.g. the owning instance was cascade-deleted
                Err(StoreError::JobNotFound(_)) => {}
                Err(e) => warn!(job_id = %self.job.id, error = %e, "failed to delete completed job"),
            }
        }

        self.counters.record_executed();
    }

    /// Handler failure: consume a retry, capture the error, escalate on
    /// exhaustion.
    fn handle_failure(&mut self, message: String, stack_trace: Option<String>) {
        warn!(
            job_id = %self.job.id,
            engine = %self.engine.name(),
            job_type = %self.job.job_type,
            error = %message,
            "job execution failed"
        );

        self.job.record_failure(&message, stack_trace);
        if self.job.retries > 0 && !self.retry_backoff.is_zero() {
            self.job.due_date =
                Some(Utc::now() + chrono::Duration::from_std(self.retry_backoff).unwrap_or_default());
        }
        self.job.unlock();

        match self.engine.job_store().update(&self.job) {
            Ok(saved) => {
                self.counters.record_failed();
                if saved.retries == 0 {
                    match self.engine.incident_manager().create_or_update(&saved) {
                        Ok(incident) => {
                            self.counters.record_incident();
                            error!(
                                job_id = %saved.id,
                                incident_id = %incident.id,
                                "job retries exhausted, incident created"
                            );
                        }
                        // nothing was persisted; the next failure (after an
                        // operator reset) re-attempts the escalation
                        Err(e) => error!(
                            job_id = %saved.id,
                            error = %e,
                            "incident escalation failed"
                        ),
                    }
                }
            }
            Err(StoreError::Concurrency(conflict)) => {
                debug!(
                    job_id = %self.job.id,
                    %conflict,
                    "failure update lost a race, job will be re-acquired"
                );
                self.release_for_retry();
            }
            Err(e) => warn!(job_id = %self.job.id, error = %e, "failed to persist job failure"),
        }
    }

    /// Transient path: clear the lease so the next cycle picks the job up;
    /// the retry counter is untouched.
    fn release_for_retry(&self) {
        if let Err(e) = self.engine.job_store().unlock(self.job.id) {
            warn!(job_id = %self.job.id, error = %e, "failed to unlock job for retry");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
