//! Durable failure records with causal chaining.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowforge_core::{
    ExecutionId, IncidentId, JobId, ProcessDefinitionId, ProcessInstanceId, TenantId,
};

use crate::execution::ExecutionRef;

/// Discriminates what kind of failure an incident records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    /// A job exhausted its retries
    FailedJob,
    /// Escape hatch for platform extensions
    Custom(String),
}

impl IncidentType {
    pub fn as_str(&self) -> &str {
        match self {
            IncidentType::FailedJob => "failedJob",
            IncidentType::Custom(kind) => kind,
        }
    }
}

impl core::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for IncidentType {
    fn from(value: &str) -> Self {
        match value {
            "failedJob" => IncidentType::FailedJob,
            other => IncidentType::Custom(other.to_string()),
        }
    }
}

/// A durable record of exhausted retries, chained across call-activity
/// nesting.
///
/// `cause_incident_id` points at the next-deeper incident (the one in the
/// called process); the deepest incident has no cause and is everyone's
/// `root_cause_incident_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub incident_type: IncidentType,
    /// The failing job, for incidents created directly from a job failure;
    /// `None` on incidents created by the hierarchy walk
    pub configuration: Option<JobId>,
    /// The job's exception message, where available
    pub message: Option<String>,
    pub execution_id: Option<ExecutionId>,
    pub activity_id: Option<String>,
    pub process_instance_id: Option<ProcessInstanceId>,
    pub process_definition_id: Option<ProcessDefinitionId>,
    pub tenant_id: Option<TenantId>,
    /// Next-deeper incident in the call hierarchy, `None` at the deepest level
    pub cause_incident_id: Option<IncidentId>,
    /// Deepest incident of the chain; equals `id` when there is no cause
    pub root_cause_incident_id: IncidentId,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Leaf incident for a job whose retries are exhausted.
    pub fn failed_job(
        job_id: JobId,
        message: Option<String>,
        execution: Option<&ExecutionRef>,
    ) -> Self {
        let id = IncidentId::new();
        Self {
            id,
            incident_type: IncidentType::FailedJob,
            configuration: Some(job_id),
            message,
            execution_id: execution.map(|e| e.id),
            activity_id: execution.and_then(|e| e.activity_id.clone()),
            process_instance_id: execution.map(|e| e.process_instance_id),
            process_definition_id: execution.and_then(|e| e.process_definition_id),
            tenant_id: execution.and_then(|e| e.tenant_id),
            cause_incident_id: None,
            root_cause_incident_id: id,
            created_at: Utc::now(),
        }
    }

    /// Incident on a call-activity execution whose called instance failed.
    ///
    /// Carries no configuration or message of its own; those belong to the
    /// deeper incident it links to.
    pub fn caused_by(cause: &Incident, call_activity: &ExecutionRef) -> Self {
        Self {
            id: IncidentId::new(),
            incident_type: cause.incident_type.clone(),
            configuration: None,
            message: None,
            execution_id: Some(call_activity.id),
            activity_id: call_activity.activity_id.clone(),
            process_instance_id: Some(call_activity.process_instance_id),
            process_definition_id: call_activity.process_definition_id,
            tenant_id: call_activity.tenant_id,
            cause_incident_id: Some(cause.id),
            root_cause_incident_id: cause.root_cause_incident_id,
            created_at: Utc::now(),
        }
    }

    /// An incident without a cause is the deepest of its chain.
    pub fn is_root_cause(&self) -> bool {
        self.cause_incident_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_incident_is_its_own_root_cause() {
        let incident = Incident::failed_job(JobId::new(), Some("boom".into()), None);
        assert!(incident.is_root_cause());
        assert_eq!(incident.root_cause_incident_id, incident.id);
        assert_eq!(incident.incident_type, IncidentType::FailedJob);
    }

    #[test]
    fn caused_incident_inherits_the_root_cause() {
        let root_exec = ExecutionRef::instance_root(ProcessInstanceId::new());
        let call_activity =
            ExecutionRef::child_of(&root_exec, "theCallActivity");

        let leaf = Incident::failed_job(JobId::new(), Some("boom".into()), None);
        let parent = Incident::caused_by(&leaf, &call_activity);

        assert_eq!(parent.cause_incident_id, Some(leaf.id));
        assert_eq!(parent.root_cause_incident_id, leaf.id);
        assert_eq!(parent.activity_id.as_deref(), Some("theCallActivity"));
        assert!(parent.configuration.is_none());
        assert!(parent.message.is_none());
    }
}
