//! Incident escalation and resolution.
//!
//! When a job exhausts its retries the manager creates one incident per
//! call-activity level, deepest first: the leaf incident carries the failing
//! job and its exception message; each ancestor sits on the call-activity
//! execution that started the failing instance and links downward through
//! `cause_incident_id`. The walk moves strictly outward through the nesting,
//! so the chain terminates and stays acyclic.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use flowforge_core::{ExecutionId, ProcessInstanceId};

use crate::execution::ExecutionRef;
use crate::incident::{Incident, IncidentType};
use crate::job::Job;
use crate::store::{ExecutionHierarchy, IncidentStore, StoreError};

/// Escalation failure.
///
/// A failed escalation inserts nothing: the chain is built in memory first
/// and persisted only once every hierarchy lookup succeeded.
#[derive(Debug, Clone, Error)]
pub enum EscalationError {
    #[error("execution {0} not found while building the incident chain")]
    MissingExecution(ExecutionId),
    #[error("no root execution for process instance {0}")]
    MissingInstanceRoot(ProcessInstanceId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates and resolves incidents for failed jobs.
pub struct IncidentManager {
    incidents: Arc<dyn IncidentStore>,
    hierarchy: Arc<dyn ExecutionHierarchy>,
}

impl IncidentManager {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        hierarchy: Arc<dyn ExecutionHierarchy>,
    ) -> Self {
        Self {
            incidents,
            hierarchy,
        }
    }

    /// Find or create the incident chain for a job with exhausted retries.
    ///
    /// Idempotent: when the failing execution already carries a failed-job
    /// incident it is returned unchanged. Returns the leaf incident.
    pub fn create_or_update(&self, job: &Job) -> Result<Incident, EscalationError> {
        if let Some(existing) = self.find_existing(job)? {
            debug!(job_id = %job.id, incident_id = %existing.id, "incident already open");
            return Ok(existing);
        }

        let leaf_execution = match job.execution_id {
            Some(id) => Some(
                self.hierarchy
                    .find_execution(id)?
                    .ok_or(EscalationError::MissingExecution(id))?,
            ),
            None => None,
        };

        let leaf = Incident::failed_job(
            job.id,
            job.exception_message.clone(),
            leaf_execution.as_ref(),
        );

        let mut chain = vec![leaf.clone()];
        if let Some(execution) = &leaf_execution {
            self.walk_call_hierarchy(execution, &leaf, &mut chain)?;
        }

        for incident in &chain {
            self.incidents.insert(incident.clone())?;
        }

        debug!(
            job_id = %job.id,
            incident_id = %leaf.id,
            levels = chain.len(),
            "escalated exhausted retries to incident"
        );
        Ok(leaf)
    }

    /// Delete the incidents created for this job (leaf level only).
    ///
    /// Ancestor incidents resolve independently as their own underlying
    /// failures clear. Returns how many incidents were removed; resolving an
    /// already-resolved job is a no-op.
    pub fn resolve(&self, job: &Job) -> Result<usize, StoreError> {
        let open = self.incidents.find_by_configuration(job.id)?;
        let mut resolved = 0;
        for incident in open {
            if incident.incident_type != IncidentType::FailedJob {
                continue;
            }
            match self.incidents.delete(incident.id) {
                Ok(()) => resolved += 1,
                // lost a race with another resolver; the incident is gone either way
                Err(StoreError::IncidentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if resolved > 0 {
            debug!(job_id = %job.id, resolved, "resolved open incidents");
        }
        Ok(resolved)
    }

    fn find_existing(&self, job: &Job) -> Result<Option<Incident>, StoreError> {
        let found = match job.execution_id {
            Some(execution_id) => self
                .incidents
                .find_by_execution_and_type(execution_id, &IncidentType::FailedJob)?,
            None => self
                .incidents
                .find_by_configuration(job.id)?
                .into_iter()
                .filter(|i| i.incident_type == IncidentType::FailedJob)
                .collect(),
        };
        Ok(found.into_iter().next())
    }

    /// Extend `chain` with one incident per call-activity level above
    /// `execution`, linking each to the previously built child.
    fn walk_call_hierarchy(
        &self,
        execution: &ExecutionRef,
        leaf: &Incident,
        chain: &mut Vec<Incident>,
    ) -> Result<(), EscalationError> {
        let mut child = leaf.clone();
        let mut instance = execution.process_instance_id;

        loop {
            let root = self
                .hierarchy
                .find_instance_root(instance)?
                .ok_or(EscalationError::MissingInstanceRoot(instance))?;

            let Some(super_id) = root.super_execution_id else {
                break;
            };

            let call_activity = self
                .hierarchy
                .find_execution(super_id)?
                .ok_or(EscalationError::MissingExecution(super_id))?;

            // an earlier escalation already covered this level and everything above it
            let existing = self
                .incidents
                .find_by_execution_and_type(call_activity.id, &IncidentType::FailedJob)?;
            if !existing.is_empty() {
                break;
            }

            let parent = Incident::caused_by(&child, &call_activity);
            chain.push(parent.clone());
            instance = call_activity.process_instance_id;
            child = parent;
        }

        Ok(())
    }
}
