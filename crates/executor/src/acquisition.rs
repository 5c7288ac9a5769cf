//! The polling loop that discovers and locks due jobs.
//!
//! One named acquisition owns one thread, drives the strategy, queries the
//! store of every engine registered with it, and hands locked jobs to the
//! executor's submission path. Sleeping is cooperative: a condition variable
//! with a timeout, shortened by the job-added signal and woken by shutdown.
//! No thread interruption anywhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use flowforge_engine::{Job, ProcessEngine};

use crate::config::AcquisitionConfig;
use crate::pool::SubmitError;
use crate::strategy::{EngineCycleReport, JobAcquisitionStrategy};

/// Where acquired jobs go. Implemented by the executor core.
pub(crate) trait JobDispatcher: Send + Sync {
    fn dispatch(&self, engine: &Arc<ProcessEngine>, job: Job) -> Result<(), SubmitError>;
}

/// Lifecycle of the acquisition loop, exposed for introspection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Acquiring,
    Submitting,
    Sleeping,
    Stopped,
}

/// Acquisition counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionStats {
    pub cycles_run: u64,
    pub jobs_acquired: u64,
    pub lock_races_lost: u64,
    pub submissions_rejected: u64,
    pub query_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_run: AtomicU64,
    jobs_acquired: AtomicU64,
    lock_races_lost: AtomicU64,
    submissions_rejected: AtomicU64,
    query_failures: AtomicU64,
}

#[derive(Debug, Default)]
struct HintState {
    new_job: bool,
    stopped: bool,
}

/// Interruptible sleep: wakes on timeout, a new-job signal, or shutdown.
#[derive(Debug, Default)]
struct WaitHint {
    state: Mutex<HintState>,
    changed: Condvar,
}

impl WaitHint {
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped || state.new_job {
                state.new_job = false;
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let (guard, _) = self.changed.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn notify_new_job(&self) {
        let mut state = self.state.lock().unwrap();
        state.new_job = true;
        self.changed.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.changed.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }
}

/// The acquisition loop body; one per named acquisition.
pub struct AcquireJobsRunnable {
    name: String,
    config: AcquisitionConfig,
    engines: Mutex<Vec<Arc<ProcessEngine>>>,
    strategy: Mutex<JobAcquisitionStrategy>,
    dispatcher: Arc<dyn JobDispatcher>,
    hint: WaitHint,
    state: Mutex<AcquisitionState>,
    counters: Counters,
}

impl AcquireJobsRunnable {
    fn new(
        name: String,
        config: AcquisitionConfig,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        let strategy = JobAcquisitionStrategy::new(
            config.strategy,
            config.max_jobs_per_cycle,
            config.wait_time,
        );
        Self {
            name,
            config,
            engines: Mutex::new(Vec::new()),
            strategy: Mutex::new(strategy),
            dispatcher,
            hint: WaitHint::default(),
            state: Mutex::new(AcquisitionState::Idle),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            cycles_run: self.counters.cycles_run.load(Ordering::Relaxed),
            jobs_acquired: self.counters.jobs_acquired.load(Ordering::Relaxed),
            lock_races_lost: self.counters.lock_races_lost.load(Ordering::Relaxed),
            submissions_rejected: self.counters.submissions_rejected.load(Ordering::Relaxed),
            query_failures: self.counters.query_failures.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.state.lock().unwrap() = state;
    }

    fn register_engine(&self, engine: Arc<ProcessEngine>) {
        let mut engines = self.engines.lock().unwrap();
        if !engines.iter().any(|e| e.name() == engine.name()) {
            engines.push(engine);
        }
        drop(engines);
        // wake a sleeping loop so the new engine is polled promptly
        self.hint.notify_new_job();
    }

    fn unregister_engine(&self, name: &str) -> usize {
        let mut engines = self.engines.lock().unwrap();
        engines.retain(|e| e.name() != name);
        engines.len()
    }

    fn engine_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    fn notify_new_job(&self) {
        self.hint.notify_new_job();
    }

    fn stop(&self) {
        self.hint.stop();
    }

    pub(crate) fn run(&self) {
        info!(acquisition = %self.name, "job acquisition started");

        loop {
            if self.hint.is_stopped() {
                break;
            }

            self.set_state(AcquisitionState::Acquiring);
            let engines: Vec<Arc<ProcessEngine>> = self.engines.lock().unwrap().clone();

            let plan = {
                let mut strategy = self.strategy.lock().unwrap();
                strategy.reconfigure(engines.iter().map(|e| e.name().to_string()).collect());
                strategy.plan_cycle()
            };

            let mut batch: Vec<(Arc<ProcessEngine>, Vec<Job>)> = Vec::new();
            for request in plan {
                let Some(engine) = engines.iter().find(|e| e.name() == request.engine)
                else {
                    continue;
                };
                let report = self.acquire_for_engine(engine, request.jobs_to_acquire, &mut batch);
                self.strategy.lock().unwrap().record(report);
            }

            self.set_state(AcquisitionState::Submitting);
            for (engine, jobs) in batch {
                for job in jobs {
                    let job_id = job.id;
                    if let Err(e) = self.dispatcher.dispatch(&engine, job) {
                        self.counters
                            .submissions_rejected
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            acquisition = %self.name,
                            job_id = %job_id,
                            error = %e,
                            "submission rejected, job stays locked until its lease expires"
                        );
                    }
                }
            }

            self.counters.cycles_run.fetch_add(1, Ordering::Relaxed);

            let wait = self.strategy.lock().unwrap().wait_time();
            self.set_state(AcquisitionState::Sleeping);
            if !wait.is_zero() {
                self.hint.sleep(wait);
            }
        }

        self.set_state(AcquisitionState::Stopped);
        info!(acquisition = %self.name, "job acquisition stopped");
    }

    /// Query one engine and lock as many candidates as possible. A lost lock
    /// race skips the job silently; a failed query isolates the engine for
    /// this cycle.
    fn acquire_for_engine(
        &self,
        engine: &Arc<ProcessEngine>,
        requested: usize,
        batch: &mut Vec<(Arc<ProcessEngine>, Vec<Job>)>,
    ) -> EngineCycleReport {
        let now = Utc::now();
        let candidates = match engine.job_store().find_due_lockable(now, requested) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.counters.query_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    acquisition = %self.name,
                    engine = %engine.name(),
                    error = %e,
                    "acquisition query failed, engine skipped for this cycle"
                );
                return EngineCycleReport::failure(engine.name(), requested);
            }
        };

        let found = candidates.len();
        let until = now
            + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_default();

        let mut locked = Vec::new();
        for mut job in candidates {
            match engine
                .job_store()
                .try_lock(job.id, &self.config.lock_owner, until)
            {
                Ok(true) => {
                    job.lock(self.config.lock_owner.clone(), until);
                    locked.push(job);
                }
                Ok(false) => {
                    self.counters.lock_races_lost.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        acquisition = %self.name,
                        job_id = %job.id,
                        "lost the lock race, skipping job"
                    );
                }
                Err(e) => {
                    self.counters.lock_races_lost.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        acquisition = %self.name,
                        job_id = %job.id,
                        error = %e,
                        "lock attempt failed, skipping job"
                    );
                }
            }
        }

        self.counters
            .jobs_acquired
            .fetch_add(locked.len() as u64, Ordering::Relaxed);

        let report = EngineCycleReport {
            engine: engine.name().to_string(),
            requested,
            found,
            locked: locked.len(),
            failed: false,
        };
        if !locked.is_empty() {
            batch.push((engine.clone(), locked));
        }
        report
    }
}

/// A named acquisition: config, loop, and its thread.
pub struct JobAcquisition {
    name: String,
    config: AcquisitionConfig,
    runnable: Arc<AcquireJobsRunnable>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl JobAcquisition {
    pub(crate) fn new(
        name: impl Into<String>,
        config: AcquisitionConfig,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        let name = name.into();
        let runnable = Arc::new(AcquireJobsRunnable::new(
            name.clone(),
            config.clone(),
            dispatcher,
        ));
        Self {
            name,
            config,
            runnable,
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// The loop body, for introspection and tests.
    pub fn acquire_jobs_runnable(&self) -> &Arc<AcquireJobsRunnable> {
        &self.runnable
    }

    pub fn state(&self) -> AcquisitionState {
        self.runnable.state()
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.runnable.stats()
    }

    /// Narrow latency hook: shorten the current sleep because a near-future
    /// job was committed.
    pub fn job_added(&self) {
        self.runnable.notify_new_job();
    }

    pub(crate) fn register_engine(&self, engine: Arc<ProcessEngine>) {
        self.runnable.register_engine(engine);
    }

    pub(crate) fn unregister_engine(&self, name: &str) -> usize {
        self.runnable.unregister_engine(name)
    }

    pub(crate) fn engine_count(&self) -> usize {
        self.runnable.engine_count()
    }

    /// Spawn the acquisition thread if it is not running yet.
    pub(crate) fn ensure_started(&self) {
        let mut thread = self.thread.lock().unwrap();
        if thread.is_some() {
            return;
        }
        let runnable = self.runnable.clone();
        let handle = std::thread::Builder::new()
            .name(format!("flowforge-acquisition-{}", self.name))
            .spawn(move || runnable.run())
            .expect("failed to spawn acquisition thread");
        *thread = Some(handle);
    }

    /// Cooperative stop: raise the flag, wake the sleeper, join the thread.
    pub fn shutdown(&self) {
        self.runnable.stop();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl core::fmt::Debug for JobAcquisition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobAcquisition")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_engine::{InMemoryEngineStore, JobStore};
    use flowforge_core::JobId;

    struct CollectingDispatcher {
        dispatched: Mutex<Vec<JobId>>,
    }

    impl CollectingDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                dispatched: Mutex::new(Vec::new()),
            })
        }

        fn dispatched(&self) -> Vec<JobId> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    impl JobDispatcher for CollectingDispatcher {
        fn dispatch(&self, _engine: &Arc<ProcessEngine>, job: Job) -> Result<(), SubmitError> {
            self.dispatched.lock().unwrap().push(job.id);
            Ok(())
        }
    }

    struct RejectingDispatcher;

    impl JobDispatcher for RejectingDispatcher {
        fn dispatch(&self, _engine: &Arc<ProcessEngine>, _job: Job) -> Result<(), SubmitError> {
            Err(SubmitError::QueueFull)
        }
    }

    fn test_engine(name: &str, store: &Arc<InMemoryEngineStore>) -> Arc<ProcessEngine> {
        Arc::new(
            ProcessEngine::builder(name)
                .with_store(store.clone())
                .build()
                .unwrap(),
        )
    }

    fn fast_config() -> AcquisitionConfig {
        AcquisitionConfig::default()
            .with_wait_time(Duration::from_millis(10))
            .with_lock_duration(Duration::from_secs(60))
    }

    fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn acquires_and_dispatches_due_jobs() {
        let store = Arc::new(InMemoryEngineStore::new());
        let dispatcher = CollectingDispatcher::new();
        let acquisition =
            JobAcquisition::new("default", fast_config(), dispatcher.clone());
        acquisition.register_engine(test_engine("default", &store));

        let job = Job::new("noop", serde_json::json!({}));
        let job_id = JobStore::insert(store.as_ref(), job).unwrap();

        acquisition.ensure_started();
        assert!(wait_until(Duration::from_secs(2), || {
            dispatcher.dispatched().contains(&job_id)
        }));

        // the dispatched job carries the acquisition's lease
        let stored = JobStore::find(store.as_ref(), job_id).unwrap().unwrap();
        assert_eq!(
            stored.lock_owner.as_deref(),
            Some(acquisition.config().lock_owner.as_str())
        );

        acquisition.shutdown();
        assert_eq!(acquisition.state(), AcquisitionState::Stopped);
    }

    #[test]
    fn rejected_submission_leaves_the_job_locked() {
        let store = Arc::new(InMemoryEngineStore::new());
        let acquisition =
            JobAcquisition::new("default", fast_config(), Arc::new(RejectingDispatcher));
        acquisition.register_engine(test_engine("default", &store));

        let job = Job::new("noop", serde_json::json!({}));
        let job_id = JobStore::insert(store.as_ref(), job).unwrap();

        acquisition.ensure_started();
        assert!(wait_until(Duration::from_secs(2), || {
            acquisition.stats().submissions_rejected > 0
        }));
        acquisition.shutdown();

        let stored = JobStore::find(store.as_ref(), job_id).unwrap().unwrap();
        assert!(stored.lock_owner.is_some());
    }

    #[test]
    fn a_failing_engine_does_not_stop_the_loop() {
        let store = Arc::new(InMemoryEngineStore::new());
        let dispatcher = CollectingDispatcher::new();
        let acquisition =
            JobAcquisition::new("default", fast_config(), dispatcher.clone());
        acquisition.register_engine(test_engine("default", &store));

        store.fail_acquisition_queries(true);
        let job = Job::new("noop", serde_json::json!({}));
        let job_id = JobStore::insert(store.as_ref(), job).unwrap();

        acquisition.ensure_started();
        assert!(wait_until(Duration::from_secs(2), || {
            acquisition.stats().query_failures > 0
        }));

        store.fail_acquisition_queries(false);
        assert!(wait_until(Duration::from_secs(2), || {
            dispatcher.dispatched().contains(&job_id)
        }));
        acquisition.shutdown();
    }

    #[test]
    fn job_added_signal_shortens_the_sleep() {
        let store = Arc::new(InMemoryEngineStore::new());
        let dispatcher = CollectingDispatcher::new();
        let config = fast_config().with_wait_time(Duration::from_secs(30));
        let acquisition = JobAcquisition::new("default", config, dispatcher.clone());
        acquisition.register_engine(test_engine("default", &store));

        acquisition.ensure_started();
        // let the first (empty) cycle finish and the loop go to sleep
        assert!(wait_until(Duration::from_secs(2), || {
            acquisition.state() == AcquisitionState::Sleeping
        }));

        let job = Job::new("noop", serde_json::json!({}));
        let job_id = JobStore::insert(store.as_ref(), job).unwrap();
        acquisition.job_added();

        assert!(wait_until(Duration::from_secs(2), || {
            dispatcher.dispatched().contains(&job_id)
        }));
        acquisition.shutdown();
    }

    #[test]
    fn shutdown_before_start_is_safe() {
        let acquisition = JobAcquisition::new(
            "default",
            fast_config(),
            Arc::new(RejectingDispatcher),
        );
        acquisition.shutdown();
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
    }
}
