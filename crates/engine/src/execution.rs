//! Minimal projection of the engine's execution tree.
//!
//! The job executor does not walk process graphs; it only needs enough of the
//! execution hierarchy to attach incidents to the right place and to cross
//! call-activity boundaries when chaining them.

use serde::{Deserialize, Serialize};

use flowforge_core::{ExecutionId, ProcessDefinitionId, ProcessInstanceId, TenantId};

/// A single execution within a process instance.
///
/// `super_execution_id` is only set on an instance's root execution and
/// points at the call-activity execution in the parent process instance that
/// started it. Following it strictly decreases call-activity nesting depth,
/// which is what keeps the incident chain acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRef {
    pub id: ExecutionId,
    pub process_instance_id: ProcessInstanceId,
    pub process_definition_id: Option<ProcessDefinitionId>,
    /// Activity the execution currently points at (e.g. a service task or a
    /// call activity)
    pub activity_id: Option<String>,
    /// Call-activity execution in the parent instance, for instance roots
    pub super_execution_id: Option<ExecutionId>,
    pub tenant_id: Option<TenantId>,
}

impl ExecutionRef {
    /// Root execution of a top-level process instance.
    ///
    /// The root execution shares its id with the process instance; hierarchy
    /// lookups rely on that.
    pub fn instance_root(process_instance_id: ProcessInstanceId) -> Self {
        Self {
            id: ExecutionId::from_uuid(*process_instance_id.as_uuid()),
            process_instance_id,
            process_definition_id: None,
            activity_id: None,
            super_execution_id: None,
            tenant_id: None,
        }
    }

    /// Child execution within the same process instance.
    pub fn child_of(parent: &ExecutionRef, activity_id: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::new(),
            process_instance_id: parent.process_instance_id,
            process_definition_id: parent.process_definition_id,
            activity_id: Some(activity_id.into()),
            super_execution_id: None,
            tenant_id: parent.tenant_id,
        }
    }

    pub fn with_definition(mut self, definition: ProcessDefinitionId) -> Self {
        self.process_definition_id = Some(definition);
        self
    }

    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    /// Mark this execution as started by a call activity in a parent instance.
    pub fn called_from(mut self, super_execution: ExecutionId) -> Self {
        self.super_execution_id = Some(super_execution);
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}
