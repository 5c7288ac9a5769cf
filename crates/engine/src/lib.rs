//! `flowforge-engine` — job and incident model for the process platform.
//!
//! ## Design
//!
//! - Jobs are lease-locked units of deferred work (timers, async
//!   continuations, retries), scoped to a process engine and optionally a
//!   tenant
//! - Persistence is consumed through narrow store traits; the store's atomic
//!   conditional lock update is the only cross-node coordination primitive
//! - Exhausted retries escalate into incidents with a causal chain across
//!   call-activity nesting
//!
//! ## Components
//!
//! - `Job`: the schedulable unit with lock lease and retry state
//! - `Incident`: durable failure record with cause/root-cause linkage
//! - `JobStore` / `IncidentStore` / `ExecutionHierarchy`: persistence traits
//! - `InMemoryEngineStore`: store implementation for tests/dev
//! - `IncidentManager`: escalation and resolution logic
//! - `ProcessEngine`: the handle an executor binds to

pub mod engine;
pub mod execution;
pub mod handler;
pub mod incident;
pub mod incidents;
pub mod job;
pub mod memory;
pub mod store;

pub use engine::{EngineError, ProcessEngine, ProcessEngineBuilder};
pub use execution::ExecutionRef;
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, JobContext};
pub use incident::{Incident, IncidentType};
pub use incidents::{EscalationError, IncidentManager};
pub use job::{Job, DEFAULT_RETRIES};
pub use memory::InMemoryEngineStore;
pub use store::{ExecutionHierarchy, IncidentStore, JobStore, StoreError};
