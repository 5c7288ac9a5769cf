//! The platform-wide job executor.
//!
//! Owns the one bounded worker pool every registered engine shares, the
//! acquisition threads, and the registry binding engine names to acquisition
//! names. N engines in one process never spawn N pools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use flowforge_core::JobId;
use flowforge_engine::{Job, ProcessEngine, StoreError};

use crate::acquisition::{JobAcquisition, JobDispatcher};
use crate::config::{AcquisitionConfig, ExecutorConfig};
use crate::exclusive::ExclusiveJobTable;
use crate::pool::{SubmitError, WorkerPool};
use crate::runnable::JobExecutionRunnable;

/// Registration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("engine '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("engine '{0}' is not registered")]
    NotRegistered(String),
}

/// Executor counters snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStats {
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub incidents_created: u64,
    /// Jobs currently executing on the pool
    pub current_running: usize,
    /// Jobs waiting in the bounded queue
    pub currently_queued: usize,
}

/// Shared atomic counters, updated inline by execution runnables.
#[derive(Debug, Default)]
pub struct ExecutorCounters {
    jobs_executed: AtomicU64,
    jobs_failed: AtomicU64,
    incidents_created: AtomicU64,
}

impl ExecutorCounters {
    pub(crate) fn record_executed(&self) {
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_incident(&self) {
        self.incidents_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            incidents_created: self.incidents_created.load(Ordering::Relaxed),
            current_running: 0,
            currently_queued: 0,
        }
    }
}

#[derive(Debug, Default)]
struct InflightInner {
    counts: Mutex<HashMap<String, usize>>,
    changed: Condvar,
}

/// Per-engine in-flight execution counts, so unregistration can drain one
/// engine without touching the others.
#[derive(Debug, Clone, Default)]
struct InflightTracker {
    inner: Arc<InflightInner>,
}

impl InflightTracker {
    fn enter(&self, engine: &str) {
        let mut counts = self.inner.counts.lock().unwrap();
        *counts.entry(engine.to_string()).or_insert(0) += 1;
    }

    fn exit(&self, engine: &str) {
        let mut counts = self.inner.counts.lock().unwrap();
        if let Some(count) = counts.get_mut(engine) {
            *count -= 1;
            if *count == 0 {
                counts.remove(engine);
            }
        }
        self.inner.changed.notify_all();
    }

    /// Wait until the engine has no queued or running jobs. Returns false on
    /// timeout.
    fn wait_idle(&self, engine: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.inner.counts.lock().unwrap();
        while counts.get(engine).copied().unwrap_or(0) > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .changed
                .wait_timeout(counts, deadline - now)
                .unwrap();
            counts = guard;
        }
        true
    }
}

/// Shared between the executor facade and every acquisition.
struct ExecutorCore {
    config: ExecutorConfig,
    pool: RwLock<Option<WorkerPool>>,
    exclusive: Arc<ExclusiveJobTable>,
    inflight: InflightTracker,
    counters: Arc<ExecutorCounters>,
}

impl JobDispatcher for ExecutorCore {
    fn dispatch(&self, engine: &Arc<ProcessEngine>, job: Job) -> Result<(), SubmitError> {
        let pool = self.pool.read().unwrap();
        let Some(pool) = pool.as_ref() else {
            return Err(SubmitError::ShutDown);
        };

        let engine_name = engine.name().to_string();
        self.inflight.enter(&engine_name);

        let runnable = JobExecutionRunnable::new(
            engine.clone(),
            job,
            self.exclusive.clone(),
            self.config.retry_backoff,
            self.counters.clone(),
        );
        let tracker = self.inflight.clone();

        let result = pool.submit(
            self.config.submission_timeout,
            Box::new(move || {
                runnable.run();
                tracker.exit(&engine_name);
            }),
        );
        if result.is_err() {
            self.inflight.exit(engine.name());
        }
        result
    }
}

/// Platform-wide coordinator for acquisitions, engines, and the worker pool.
pub struct JobExecutor {
    core: Arc<ExecutorCore>,
    acquisitions: Mutex<HashMap<String, Arc<JobAcquisition>>>,
    acquisition_configs: Mutex<HashMap<String, AcquisitionConfig>>,
    bindings: Mutex<HashMap<String, String>>,
    started: AtomicBool,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            core: Arc::new(ExecutorCore {
                config,
                pool: RwLock::new(None),
                exclusive: Arc::new(ExclusiveJobTable::new()),
                inflight: InflightTracker::default(),
                counters: Arc::new(ExecutorCounters::default()),
            }),
            acquisitions: Mutex::new(HashMap::new()),
            acquisition_configs: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Pre-declare the configuration a named acquisition will use once the
    /// first engine binds to it.
    pub fn with_acquisition(self, name: impl Into<String>, config: AcquisitionConfig) -> Self {
        self.acquisition_configs
            .lock()
            .unwrap()
            .insert(name.into(), config);
        self
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the worker pool and every registered acquisition thread.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = WorkerPool::start(
            "flowforge",
            self.core.config.worker_threads,
            self.core.config.queue_capacity,
        );
        *self.core.pool.write().unwrap() = Some(pool);

        for acquisition in self.acquisitions.lock().unwrap().values() {
            acquisition.ensure_started();
        }
        info!("job executor started");
    }

    /// Graceful stop: acquisitions first, then the pool with its drain
    /// timeout. Jobs still locked in the store simply expire.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let acquisitions: Vec<Arc<JobAcquisition>> =
            self.acquisitions.lock().unwrap().values().cloned().collect();
        for acquisition in acquisitions {
            acquisition.shutdown();
        }

        let pool = self.core.pool.write().unwrap().take();
        if let Some(pool) = pool {
            pool.shutdown(self.core.config.shutdown_timeout);
        }
        info!("job executor stopped");
    }

    /// Bind an engine to a named acquisition. The acquisition (and its
    /// thread, if the executor is running) is created lazily on first use.
    pub fn register_process_engine(
        &self,
        engine: Arc<ProcessEngine>,
        acquisition_name: &str,
    ) -> Result<BoundEngine, ExecutorError> {
        let mut bindings = self.bindings.lock().unwrap();
        if bindings.contains_key(engine.name()) {
            return Err(ExecutorError::AlreadyRegistered(engine.name().to_string()));
        }

        let acquisition = {
            let mut acquisitions = self.acquisitions.lock().unwrap();
            acquisitions
                .entry(acquisition_name.to_string())
                .or_insert_with(|| {
                    let config = self
                        .acquisition_configs
                        .lock()
                        .unwrap()
                        .get(acquisition_name)
                        .cloned()
                        .unwrap_or_default();
                    let dispatcher: Arc<dyn JobDispatcher> = self.core.clone();
                    Arc::new(JobAcquisition::new(acquisition_name, config, dispatcher))
                })
                .clone()
        };

        acquisition.register_engine(engine.clone());
        if self.is_started() {
            acquisition.ensure_started();
        }
        bindings.insert(engine.name().to_string(), acquisition_name.to_string());

        info!(
            engine = %engine.name(),
            acquisition = %acquisition_name,
            "process engine registered"
        );
        Ok(BoundEngine {
            engine,
            acquisition,
        })
    }

    /// Unbind an engine: stop acquiring for it, drain its in-flight jobs
    /// (bounded), and stop the acquisition thread when no engine is left on
    /// it. Other engines on the same acquisition keep running.
    pub fn unregister_process_engine(&self, engine_name: &str) -> Result<(), ExecutorError> {
        let acquisition_name = self
            .bindings
            .lock()
            .unwrap()
            .remove(engine_name)
            .ok_or_else(|| ExecutorError::NotRegistered(engine_name.to_string()))?;

        let acquisition = self
            .acquisitions
            .lock()
            .unwrap()
            .get(&acquisition_name)
            .cloned();

        if let Some(acquisition) = acquisition {
            let remaining = acquisition.unregister_engine(engine_name);

            if !self
                .core
                .inflight
                .wait_idle(engine_name, self.core.config.shutdown_timeout)
            {
                warn!(
                    engine = %engine_name,
                    "in-flight jobs did not drain within the timeout"
                );
            }

            if remaining == 0 {
                acquisition.shutdown();
                self.acquisitions.lock().unwrap().remove(&acquisition_name);
                debug!(
                    acquisition = %acquisition_name,
                    "acquisition stopped, no engines left"
                );
            }
        }

        info!(engine = %engine_name, "process engine unregistered");
        Ok(())
    }

    pub fn get_job_acquisition_by_name(&self, name: &str) -> Option<Arc<JobAcquisition>> {
        self.acquisitions.lock().unwrap().get(name).cloned()
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.core.counters.snapshot();
        if let Some(pool) = self.core.pool.read().unwrap().as_ref() {
            stats.current_running = pool.active_count();
            stats.currently_queued = pool.queued_count();
        }
        stats
    }
}

impl Drop for JobExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What `register_process_engine` hands back: the engine plus its
/// acquisition, including the narrow job-added latency hook.
#[derive(Clone, Debug)]
pub struct BoundEngine {
    engine: Arc<ProcessEngine>,
    acquisition: Arc<JobAcquisition>,
}

impl BoundEngine {
    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.engine
    }

    pub fn acquisition(&self) -> &Arc<JobAcquisition> {
        &self.acquisition
    }

    /// Signal that a near-future job was committed, shortening the next
    /// acquisition sleep. Purely a latency optimization.
    pub fn job_added(&self) {
        self.acquisition.job_added();
    }

    /// Persist a job and nudge the acquisition.
    pub fn schedule(&self, job: Job) -> Result<JobId, StoreError> {
        let id = self.engine.schedule(job)?;
        self.acquisition.job_added();
        Ok(id)
    }
}
