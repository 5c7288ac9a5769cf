use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowforge_engine::{InMemoryEngineStore, Job, JobStore};
use flowforge_executor::{
    AcquisitionStrategyKind, EngineCycleReport, JobAcquisitionStrategy,
};

fn seeded_store(jobs: usize) -> Arc<InMemoryEngineStore> {
    let store = Arc::new(InMemoryEngineStore::new());
    for i in 0..jobs {
        let job = Job::new("bench", serde_json::json!({ "i": i }))
            .with_priority((i % 10) as i64);
        JobStore::insert(store.as_ref(), job).unwrap();
    }
    store
}

fn bench_strategy_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy_planning");

    for engines in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("sequential", engines),
            &engines,
            |b, &engines| {
                let mut strategy = JobAcquisitionStrategy::new(
                    AcquisitionStrategyKind::Sequential,
                    3,
                    Duration::from_secs(5),
                );
                strategy.reconfigure((0..engines).map(|i| format!("engine-{i}")).collect());
                b.iter(|| {
                    let plan = strategy.plan_cycle();
                    for request in &plan {
                        strategy.record(EngineCycleReport {
                            engine: request.engine.clone(),
                            requested: request.jobs_to_acquire,
                            found: request.jobs_to_acquire,
                            locked: request.jobs_to_acquire,
                            failed: false,
                        });
                    }
                    black_box(strategy.wait_time())
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("simultaneous", engines),
            &engines,
            |b, &engines| {
                let mut strategy = JobAcquisitionStrategy::new(
                    AcquisitionStrategyKind::Simultaneous,
                    3 * engines,
                    Duration::from_secs(5),
                );
                strategy.reconfigure((0..engines).map(|i| format!("engine-{i}")).collect());
                b.iter(|| black_box(strategy.plan_cycle()));
            },
        );
    }

    group.finish();
}

fn bench_due_lockable_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("due_lockable_query");

    for jobs in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            let store = seeded_store(jobs);
            let now = Utc::now();
            b.iter(|| black_box(store.find_due_lockable(now, 3).unwrap()));
        });
    }

    group.finish();
}

fn bench_conditional_lock(c: &mut Criterion) {
    c.bench_function("conditional_lock_acquire_release", |b| {
        let store = seeded_store(1);
        let id = store.find_due_lockable(Utc::now(), 1).unwrap()[0].id;
        b.iter(|| {
            let until = Utc::now() + chrono::Duration::minutes(5);
            assert!(store.try_lock(id, "bench-owner", until).unwrap());
            store.unlock(id).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_strategy_planning,
    bench_due_lockable_query,
    bench_conditional_lock
);
criterion_main!(benches);
