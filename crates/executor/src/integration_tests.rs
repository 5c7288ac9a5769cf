//! Cross-component scenarios: acquisition, pool, exclusivity, and incident
//! escalation working together against the in-memory store.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use flowforge_core::JobId;
use flowforge_engine::{
    HandlerError, InMemoryEngineStore, Job, JobContext, JobStore, ProcessEngine,
    execution::ExecutionRef,
};

use crate::config::{AcquisitionConfig, AcquisitionStrategyKind, ExecutorConfig};
use crate::executor::JobExecutor;

fn fast_executor() -> JobExecutor {
    JobExecutor::new(
        ExecutorConfig::default()
            .with_worker_threads(4)
            .with_queue_capacity(16)
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .with_acquisition("default", fast_acquisition())
}

fn fast_acquisition() -> AcquisitionConfig {
    AcquisitionConfig::default()
        .with_wait_time(Duration::from_millis(10))
        .with_lock_duration(Duration::from_secs(60))
}

fn engine_with(
    name: &str,
    store: &Arc<InMemoryEngineStore>,
    handler: impl Fn(&JobContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
) -> Arc<ProcessEngine> {
    Arc::new(
        ProcessEngine::builder(name)
            .with_store(store.clone())
            .with_handler("*", handler)
            .build()
            .unwrap(),
    )
}

fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn always_failing_job_exhausts_retries_into_one_incident() {
    let store = Arc::new(InMemoryEngineStore::new());
    let executions = Arc::new(AtomicU32::new(0));
    let executions_clone = executions.clone();
    let engine = engine_with("default", &store, move |_ctx| {
        executions_clone.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::failed("always failing"))
    });

    let executor = fast_executor();
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    let job_id = bound
        .schedule(Job::new("doomed", serde_json::json!({})).with_retries(3))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        store.incident_count() == 1
    }));
    executor.shutdown();

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    let job = JobStore::find(store.as_ref(), job_id).unwrap().unwrap();
    assert_eq!(job.retries, 0);
    assert_eq!(job.exception_message.as_deref(), Some("always failing"));

    let incident = store.all_incidents().remove(0);
    assert!(incident.is_root_cause());
    assert_eq!(incident.configuration, Some(job_id));
    assert_eq!(incident.root_cause_incident_id, incident.id);
}

#[test]
fn sequential_acquisition_serves_both_engines() {
    let store_a = Arc::new(InMemoryEngineStore::new());
    let store_b = Arc::new(InMemoryEngineStore::new());
    let engine_a = engine_with("engine-a", &store_a, |_ctx| Ok(()));
    let engine_b = engine_with("engine-b", &store_b, |_ctx| Ok(()));

    let executor = JobExecutor::new(ExecutorConfig::default()).with_acquisition(
        "default",
        fast_acquisition().with_strategy(AcquisitionStrategyKind::Sequential),
    );
    let bound_a = executor
        .register_process_engine(engine_a, "default")
        .unwrap();
    let bound_b = executor
        .register_process_engine(engine_b, "default")
        .unwrap();
    executor.start();

    bound_a
        .schedule(Job::new("noop", serde_json::json!({})))
        .unwrap();
    bound_b
        .schedule(Job::new("noop", serde_json::json!({})))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        store_a.job_count() == 0 && store_b.job_count() == 0
    }));
    executor.shutdown();

    // round-robin polled each engine's store separately
    assert!(store_a.acquisition_query_count() >= 1);
    assert!(store_b.acquisition_query_count() >= 1);
    assert_eq!(store_a.incident_count() + store_b.incident_count(), 0);
}

#[test]
fn child_process_failure_chains_incidents_across_the_call_activity() {
    let store = Arc::new(InMemoryEngineStore::new());

    let parent_root = ExecutionRef::instance_root(flowforge_core::ProcessInstanceId::new());
    store.insert_execution(parent_root.clone());
    let call_activity = ExecutionRef::child_of(&parent_root, "theCallActivity");
    store.insert_execution(call_activity.clone());
    let child_root = ExecutionRef::instance_root(flowforge_core::ProcessInstanceId::new())
        .called_from(call_activity.id);
    store.insert_execution(child_root.clone());
    let task = ExecutionRef::child_of(&child_root, "theServiceTask");
    store.insert_execution(task.clone());

    let engine = engine_with("default", &store, |_ctx| {
        Err(HandlerError::failed("child failing"))
    });
    let executor = fast_executor();
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    let job_id = bound
        .schedule(
            Job::new("doomed", serde_json::json!({}))
                .with_retries(1)
                .on_execution(&task),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        store.incident_count() == 2
    }));
    executor.shutdown();

    let incidents = store.all_incidents();
    let leaf = incidents
        .iter()
        .find(|i| i.configuration == Some(job_id))
        .unwrap();
    let parent = incidents
        .iter()
        .find(|i| i.configuration.is_none())
        .unwrap();

    assert!(leaf.is_root_cause());
    assert_eq!(leaf.process_instance_id, Some(task.process_instance_id));
    assert_eq!(parent.execution_id, Some(call_activity.id));
    assert_eq!(parent.cause_incident_id, Some(leaf.id));
    assert_eq!(parent.root_cause_incident_id, leaf.id);
    assert_eq!(leaf.root_cause_incident_id, leaf.id);
}

#[test]
fn a_single_worker_drains_multiple_jobs() {
    let store = Arc::new(InMemoryEngineStore::new());
    let engine = engine_with("default", &store, |_ctx| Ok(()));

    let executor = JobExecutor::new(
        ExecutorConfig::default()
            .with_worker_threads(1)
            .with_queue_capacity(8),
    )
    .with_acquisition("default", fast_acquisition());
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    bound
        .schedule(Job::new("first", serde_json::json!({})))
        .unwrap();
    bound
        .schedule(Job::new("second", serde_json::json!({})))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        executor.stats().jobs_executed == 2
    }));
    executor.shutdown();

    assert_eq!(store.job_count(), 0);
    assert_eq!(store.incident_count(), 0);
}

#[test]
fn shutdown_waits_for_the_job_in_flight() {
    let store = Arc::new(InMemoryEngineStore::new());
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let started_clone = started.clone();
    let finished_clone = finished.clone();
    let engine = engine_with("default", &store, move |_ctx| {
        started_clone.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        finished_clone.store(true, Ordering::SeqCst);
        Ok(())
    });

    let executor = fast_executor();
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    bound
        .schedule(Job::new("slow", serde_json::json!({})))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        started.load(Ordering::SeqCst)
    }));

    executor.shutdown();
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn exclusive_jobs_of_one_instance_never_overlap() {
    let store = Arc::new(InMemoryEngineStore::new());
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let active_clone = active.clone();
    let overlaps_clone = overlaps.clone();
    let runs_clone = runs.clone();
    let engine = engine_with("default", &store, move |_ctx| {
        if active_clone.fetch_add(1, Ordering::SeqCst) > 0 {
            overlaps_clone.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(25));
        active_clone.fetch_sub(1, Ordering::SeqCst);
        runs_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let executor = fast_executor();
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    let instance = flowforge_core::ProcessInstanceId::new();
    for _ in 0..4 {
        let mut job = Job::new("exclusive-step", serde_json::json!({})).exclusive();
        job.process_instance_id = Some(instance);
        bound.schedule(job).unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        runs.load(Ordering::SeqCst) == 4
    }));
    executor.shutdown();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(store.job_count(), 0);
}

#[test]
fn two_executors_on_one_store_run_each_job_once() {
    let store = Arc::new(InMemoryEngineStore::new());
    let counts: Arc<Mutex<std::collections::HashMap<JobId, u32>>> =
        Arc::new(Mutex::new(std::collections::HashMap::new()));

    let make_handler = |counts: Arc<Mutex<std::collections::HashMap<JobId, u32>>>| {
        move |ctx: &JobContext<'_>| -> Result<(), HandlerError> {
            *counts.lock().unwrap().entry(ctx.job.id).or_insert(0) += 1;
            thread::sleep(Duration::from_millis(5));
            Ok(())
        }
    };

    let executor_a = fast_executor();
    let executor_b = fast_executor();
    let bound_a = executor_a
        .register_process_engine(
            engine_with("default", &store, make_handler(counts.clone())),
            "default",
        )
        .unwrap();
    executor_b
        .register_process_engine(
            engine_with("default", &store, make_handler(counts.clone())),
            "default",
        )
        .unwrap();
    executor_a.start();
    executor_b.start();

    let mut job_ids = Vec::new();
    for i in 0..10 {
        let id = bound_a
            .schedule(Job::new("shared", serde_json::json!({ "i": i })))
            .unwrap();
        job_ids.push(id);
    }

    assert!(wait_until(Duration::from_secs(10), || store.job_count() == 0));
    executor_a.shutdown();
    executor_b.shutdown();

    let counts = counts.lock().unwrap();
    for id in job_ids {
        assert_eq!(counts.get(&id), Some(&1), "job {id} must run exactly once");
    }
    assert_eq!(store.incident_count(), 0);
}

#[test]
fn suspended_jobs_wait_for_activation() {
    let store = Arc::new(InMemoryEngineStore::new());
    let engine = engine_with("default", &store, |_ctx| Ok(()));

    let executor = fast_executor();
    let bound = executor
        .register_process_engine(engine.clone(), "default")
        .unwrap();
    executor.start();

    let mut job = Job::new("paused", serde_json::json!({}));
    job.suspended = true;
    let job_id = bound.schedule(job).unwrap();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(store.job_count(), 1);

    engine.activate_job(job_id).unwrap();
    bound.job_added();
    assert!(wait_until(Duration::from_secs(5), || store.job_count() == 0));
    executor.shutdown();
}

#[test]
fn retry_reset_revives_an_exhausted_job_and_clears_the_incident() {
    let store = Arc::new(InMemoryEngineStore::new());
    let healthy = Arc::new(AtomicBool::new(false));

    let healthy_clone = healthy.clone();
    let engine = engine_with("default", &store, move |_ctx| {
        if healthy_clone.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HandlerError::failed("still broken"))
        }
    });

    let executor = fast_executor();
    let bound = executor
        .register_process_engine(engine.clone(), "default")
        .unwrap();
    executor.start();

    let job_id = bound
        .schedule(Job::new("flaky", serde_json::json!({})).with_retries(1))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        store.incident_count() == 1
    }));

    // operator fixes the cause, then resets the retries
    healthy.store(true, Ordering::SeqCst);
    engine.set_job_retries(job_id, 1).unwrap();
    assert_eq!(store.incident_count(), 0);
    bound.job_added();

    assert!(wait_until(Duration::from_secs(5), || store.job_count() == 0));
    executor.shutdown();
    assert_eq!(store.incident_count(), 0);
}

#[test]
fn unregistering_drains_one_engine_and_leaves_the_other_running() {
    let store_a = Arc::new(InMemoryEngineStore::new());
    let store_b = Arc::new(InMemoryEngineStore::new());
    let finished_a = Arc::new(AtomicBool::new(false));

    let finished_clone = finished_a.clone();
    let engine_a = engine_with("engine-a", &store_a, move |_ctx| {
        thread::sleep(Duration::from_millis(200));
        finished_clone.store(true, Ordering::SeqCst);
        Ok(())
    });
    let engine_b = engine_with("engine-b", &store_b, |_ctx| Ok(()));

    let executor = fast_executor();
    let bound_a = executor
        .register_process_engine(engine_a, "default")
        .unwrap();
    let bound_b = executor
        .register_process_engine(engine_b, "default")
        .unwrap();
    executor.start();

    bound_a
        .schedule(Job::new("slow", serde_json::json!({})))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        executor.stats().current_running > 0
    }));

    executor.unregister_process_engine("engine-a").unwrap();
    assert!(finished_a.load(Ordering::SeqCst));

    // the shared acquisition still serves engine-b
    bound_b
        .schedule(Job::new("noop", serde_json::json!({})))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || store_b.job_count() == 0));
    executor.shutdown();
}

#[test]
fn recurring_timer_reschedules_after_each_run() {
    let store = Arc::new(InMemoryEngineStore::new());
    let runs = Arc::new(AtomicU32::new(0));
    let runs_clone = runs.clone();
    let engine = engine_with("default", &store, move |_ctx| {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let executor = fast_executor();
    let bound = executor.register_process_engine(engine, "default").unwrap();
    executor.start();

    let job_id = bound
        .schedule(Job::new("tick", serde_json::json!({})).repeating(Duration::from_secs(3600)))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        runs.load(Ordering::SeqCst) >= 1
    }));
    executor.shutdown();

    // still there, parked until the next occurrence
    let job = JobStore::find(store.as_ref(), job_id).unwrap().unwrap();
    assert!(!job.is_due(Utc::now()));
    assert!(job.lock_owner.is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
