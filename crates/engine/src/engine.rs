//! The engine handle a job executor binds to.
//!
//! The executor core never sees BPMN or the process graph; an engine is its
//! name, its stores, and the handlers that know how to run each job type.
//! Management operations operators need (retry reset, suspension, deletion)
//! live here because they cut across jobs and incidents.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use flowforge_core::{DomainError, DomainResult, IncidentId, JobId, ProcessInstanceId, TenantId};

use crate::handler::HandlerRegistry;
use crate::incident::Incident;
use crate::incidents::{EscalationError, IncidentManager};
use crate::job::{Job, DEFAULT_RETRIES};
use crate::store::{ExecutionHierarchy, IncidentStore, JobStore, StoreError};

/// Engine-level operation error.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Escalation(#[from] EscalationError),
}

/// A process engine as seen by the job executor.
pub struct ProcessEngine {
    name: String,
    tenant_id: Option<TenantId>,
    jobs: Arc<dyn JobStore>,
    incidents: Arc<dyn IncidentStore>,
    hierarchy: Arc<dyn ExecutionHierarchy>,
    handlers: HandlerRegistry,
    incident_manager: IncidentManager,
    default_retries: u32,
}

impl ProcessEngine {
    pub fn builder(name: impl Into<String>) -> ProcessEngineBuilder {
        ProcessEngineBuilder {
            name: name.into(),
            tenant_id: None,
            jobs: None,
            incidents: None,
            hierarchy: None,
            handlers: HandlerRegistry::new(),
            default_retries: DEFAULT_RETRIES,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn hierarchy(&self) -> &Arc<dyn ExecutionHierarchy> {
        &self.hierarchy
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn incident_manager(&self) -> &IncidentManager {
        &self.incident_manager
    }

    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }

    /// New job pre-configured with this engine's defaults.
    pub fn new_job(&self, job_type: impl Into<String>, payload: serde_json::Value) -> Job {
        let mut job = Job::new(job_type, payload).with_retries(self.default_retries);
        job.tenant_id = self.tenant_id;
        job
    }

    /// Persist a job. The caller signals the executor separately (see the
    /// bound engine handle) so a near-future job shortens the next
    /// acquisition sleep.
    pub fn schedule(&self, job: Job) -> Result<JobId, StoreError> {
        let id = self.jobs.insert(job)?;
        debug!(engine = %self.name, job_id = %id, "job scheduled");
        Ok(id)
    }

    pub fn job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.jobs.find(id)
    }

    pub fn jobs_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Job>, StoreError> {
        self.jobs.find_by_process_instance(process_instance_id)
    }

    pub fn incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        self.incidents.find(id)
    }

    pub fn incidents_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Incident>, StoreError> {
        self.incidents.find_by_process_instance(process_instance_id)
    }

    /// The incident plus everything it is caused by, leaf-ward.
    ///
    /// Lets an operator read the full diagnosis without re-deriving it.
    pub fn incident_chain(&self, id: IncidentId) -> Result<Vec<Incident>, EngineError> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(incident) = self.incidents.find(current)? else {
                break;
            };
            next = incident.cause_incident_id;
            chain.push(incident);
            // the chain is acyclic by construction; bail out instead of
            // spinning if a store hands back inconsistent data
            if chain.len() > 64 {
                break;
            }
        }
        Ok(chain)
    }

    /// Operator action: reset (or zero) a job's retries.
    ///
    /// Raising retries above zero on an exhausted job resolves its incidents
    /// and puts it back into the acquirable pool; explicitly setting zero
    /// escalates as if the job had just exhausted its retries.
    pub fn set_job_retries(&self, id: JobId, retries: u32) -> Result<(), EngineError> {
        let mut job = self.jobs.find(id)?.ok_or(EngineError::JobNotFound(id))?;
        let previous = job.retries;
        job.retries = retries;
        let job = self.jobs.update(&job)?;

        if previous == 0 && retries > 0 {
            self.incident_manager.resolve(&job)?;
            info!(engine = %self.name, job_id = %id, retries, "job retries reset");
        } else if retries == 0 && previous > 0 {
            self.incident_manager.create_or_update(&job)?;
        }
        Ok(())
    }

    /// Exclude a job from acquisition without deleting it.
    pub fn suspend_job(&self, id: JobId) -> Result<(), EngineError> {
        let mut job = self.jobs.find(id)?.ok_or(EngineError::JobNotFound(id))?;
        if job.suspended {
            return Ok(());
        }
        job.suspended = true;
        self.jobs.update(&job)?;
        Ok(())
    }

    pub fn activate_job(&self, id: JobId) -> Result<(), EngineError> {
        let mut job = self.jobs.find(id)?.ok_or(EngineError::JobNotFound(id))?;
        if !job.suspended {
            return Ok(());
        }
        job.suspended = false;
        self.jobs.update(&job)?;
        Ok(())
    }

    /// Remove a job and resolve its open incidents.
    pub fn delete_job(&self, id: JobId) -> Result<(), EngineError> {
        let job = self.jobs.find(id)?.ok_or(EngineError::JobNotFound(id))?;
        self.incident_manager.resolve(&job)?;
        self.jobs.delete(id)?;
        Ok(())
    }
}

impl core::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("name", &self.name)
            .field("tenant_id", &self.tenant_id)
            .field("default_retries", &self.default_retries)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProcessEngine`].
pub struct ProcessEngineBuilder {
    name: String,
    tenant_id: Option<TenantId>,
    jobs: Option<Arc<dyn JobStore>>,
    incidents: Option<Arc<dyn IncidentStore>>,
    hierarchy: Option<Arc<dyn ExecutionHierarchy>>,
    handlers: HandlerRegistry,
    default_retries: u32,
}

impl ProcessEngineBuilder {
    /// Use one object for jobs, incidents, and hierarchy lookups.
    pub fn with_store<S>(self, store: Arc<S>) -> Self
    where
        S: JobStore + IncidentStore + ExecutionHierarchy + 'static,
    {
        self.with_job_store(store.clone())
            .with_incident_store(store.clone())
            .with_hierarchy(store)
    }

    pub fn with_job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(store);
        self
    }

    pub fn with_incident_store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.incidents = Some(store);
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: Arc<dyn ExecutionHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_handler<F>(self, job_type_pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&crate::handler::JobContext<'_>) -> crate::handler::HandlerResult
            + Send
            + Sync
            + 'static,
    {
        self.handlers.register(job_type_pattern, handler);
        self
    }

    pub fn build(self) -> DomainResult<ProcessEngine> {
        let jobs = self
            .jobs
            .ok_or_else(|| DomainError::validation("engine requires a job store"))?;
        let incidents = self
            .incidents
            .ok_or_else(|| DomainError::validation("engine requires an incident store"))?;
        let hierarchy = self
            .hierarchy
            .ok_or_else(|| DomainError::validation("engine requires an execution hierarchy"))?;

        let incident_manager = IncidentManager::new(incidents.clone(), hierarchy.clone());

        Ok(ProcessEngine {
            name: self.name,
            tenant_id: self.tenant_id,
            jobs,
            incidents,
            hierarchy,
            handlers: self.handlers,
            incident_manager,
            default_retries: self.default_retries,
        })
    }
}
