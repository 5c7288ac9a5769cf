//! In-memory store for tests/dev.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use flowforge_core::{ExecutionId, IncidentId, JobId, ProcessInstanceId};

use crate::execution::ExecutionRef;
use crate::incident::{Incident, IncidentType};
use crate::job::Job;
use crate::store::{ExecutionHierarchy, IncidentStore, JobStore, StoreError};

/// In-memory implementation of all three store traits.
///
/// Intended for tests/dev. The conditional lock is atomic because every
/// mutation happens under one write lock; that is exactly the guarantee a
/// durable store provides with a conditional `UPDATE`.
#[derive(Debug, Default)]
pub struct InMemoryEngineStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    incidents: RwLock<HashMap<IncidentId, Incident>>,
    executions: RwLock<HashMap<ExecutionId, ExecutionRef>>,
    acquisition_queries: AtomicU64,
    fail_acquisition_queries: AtomicBool,
}

impl InMemoryEngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an execution for hierarchy lookups.
    pub fn insert_execution(&self, execution: ExecutionRef) {
        let mut executions = self.executions.write().unwrap();
        executions.insert(execution.id, execution);
    }

    /// How often `find_due_lockable` was called (acquisition cycles hitting
    /// this store).
    pub fn acquisition_query_count(&self) -> u64 {
        self.acquisition_queries.load(Ordering::Relaxed)
    }

    /// Make subsequent acquisition queries fail, for fault-injection tests.
    pub fn fail_acquisition_queries(&self, fail: bool) {
        self.fail_acquisition_queries.store(fail, Ordering::Relaxed);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn incident_count(&self) -> usize {
        self.incidents.read().unwrap().len()
    }

    /// Snapshot of every stored incident, for assertions in tests.
    pub fn all_incidents(&self) -> Vec<Incident> {
        let incidents = self.incidents.read().unwrap();
        let mut result: Vec<Incident> = incidents.values().cloned().collect();
        result.sort_by_key(|i| i.created_at);
        result
    }
}

impl JobStore for InMemoryEngineStore {
    fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&id).cloned())
    }

    fn update(&self, job: &Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let stored = jobs.get_mut(&job.id).ok_or(StoreError::JobNotFound(job.id))?;
        if stored.revision != job.revision {
            return Err(StoreError::Concurrency(format!(
                "job {}: expected revision {}, found {}",
                job.id, job.revision, stored.revision
            )));
        }
        let mut updated = job.clone();
        updated.revision += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.remove(&id).ok_or(StoreError::JobNotFound(id))?;
        Ok(())
    }

    fn find_due_lockable(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.acquisition_queries.fetch_add(1, Ordering::Relaxed);
        if self.fail_acquisition_queries.load(Ordering::Relaxed) {
            return Err(StoreError::Storage("injected query failure".to_string()));
        }

        let jobs = self.jobs.read().unwrap();
        let mut due: Vec<Job> = jobs
            .values()
            .filter(|j| j.is_acquirable(now))
            .cloned()
            .collect();

        due.sort_by_key(|j| {
            (
                Reverse(j.priority),
                j.due_date.unwrap_or(DateTime::<Utc>::MIN_UTC),
            )
        });
        due.truncate(max);
        Ok(due)
    }

    fn try_lock(
        &self,
        id: JobId,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if !job.is_lockable(Utc::now()) {
            return Ok(false);
        }
        job.lock(owner, until);
        Ok(true)
    }

    fn unlock(&self, id: JobId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.unlock();
        }
        Ok(())
    }

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| j.process_instance_id == Some(process_instance_id))
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }
}

impl IncidentStore for InMemoryEngineStore {
    fn insert(&self, incident: Incident) -> Result<IncidentId, StoreError> {
        let mut incidents = self.incidents.write().unwrap();
        let id = incident.id;
        incidents.insert(id, incident);
        Ok(id)
    }

    fn find(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        let incidents = self.incidents.read().unwrap();
        Ok(incidents.get(&id).cloned())
    }

    fn delete(&self, id: IncidentId) -> Result<(), StoreError> {
        let mut incidents = self.incidents.write().unwrap();
        incidents.remove(&id).ok_or(StoreError::IncidentNotFound(id))?;
        Ok(())
    }

    fn find_by_execution_and_type(
        &self,
        execution_id: ExecutionId,
        incident_type: &IncidentType,
    ) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read().unwrap();
        Ok(incidents
            .values()
            .filter(|i| {
                i.execution_id == Some(execution_id) && &i.incident_type == incident_type
            })
            .cloned()
            .collect())
    }

    fn find_by_configuration(&self, job_id: JobId) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read().unwrap();
        Ok(incidents
            .values()
            .filter(|i| i.configuration == Some(job_id))
            .cloned()
            .collect())
    }

    fn find_by_process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Result<Vec<Incident>, StoreError> {
        let incidents = self.incidents.read().unwrap();
        let mut result: Vec<Incident> = incidents
            .values()
            .filter(|i| i.process_instance_id == Some(process_instance_id))
            .cloned()
            .collect();
        result.sort_by_key(|i| i.created_at);
        Ok(result)
    }
}

impl ExecutionHierarchy for InMemoryEngineStore {
    fn find_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRef>, StoreError> {
        let executions = self.executions.read().unwrap();
        Ok(executions.get(&id).cloned())
    }
}
