//! Payload handlers and their registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use flowforge_core::TenantId;

use crate::execution::ExecutionRef;
use crate::job::Job;

/// What a handler sees while executing one job.
#[derive(Debug)]
pub struct JobContext<'a> {
    pub job: &'a Job,
    /// Name of the engine the job was acquired for
    pub engine: &'a str,
    /// Resolved owning execution, when the job has one
    pub execution: Option<&'a ExecutionRef>,
    pub tenant_id: Option<TenantId>,
}

/// Handler failure modes.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Business failure: consumes a retry and is captured on the job.
    #[error("{message}")]
    Failed {
        message: String,
        stack_trace: Option<String>,
    },
    /// Transient conflict (e.g. the instance's state changed concurrently):
    /// the job is re-queued without touching its retry counter.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn failed_with_trace(message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack_trace: Some(stack_trace.into()),
        }
    }

    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency(message.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Handler function type.
pub type HandlerFn = Arc<dyn Fn(&JobContext<'_>) -> HandlerResult + Send + Sync>;

/// Maps job types to handlers.
///
/// Lookup tries an exact match first, then category patterns (`"timer.*"`
/// matches `"timer.cycle"`), then the `"*"` wildcard.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, HandlerFn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type or pattern.
    pub fn register<F>(&self, job_type_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&JobContext<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap();
        handlers.insert(job_type_pattern.into(), Arc::new(handler));
    }

    /// Resolve the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<HandlerFn> {
        let handlers = self.handlers.read().unwrap();

        if let Some(h) = handlers.get(job_type) {
            return Some(h.clone());
        }

        for (pattern, handler) in handlers.iter() {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if job_type.starts_with(prefix) {
                    return Some(handler.clone());
                }
            }
        }

        handlers.get("*").cloned()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.handlers.read().unwrap();
        f.debug_struct("HandlerRegistry")
            .field("registered", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
