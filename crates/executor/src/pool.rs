//! Bounded worker pool shared by all acquisitions and engines.
//!
//! One process hosting N engines still runs one fixed pool; the bounded
//! queue plus a short submission timeout is what bounds memory under
//! overload. A rejected submission is not an error to recover from here:
//! the job stays lease-locked in the store and comes back in a later cycle.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Submission failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Queue stayed full for the whole submission timeout.
    #[error("worker queue full")]
    QueueFull,
    /// The pool is shutting down (or was never started).
    #[error("worker pool is shut down")]
    ShutDown,
}

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    capacity: usize,
    /// Signals workers that a task arrived
    not_empty: Condvar,
    /// Signals submitters (space freed) and the shutdown drain (work finished)
    progress: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
}

/// Fixed-size thread pool with a bounded submission queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` named threads sharing one bounded queue.
    pub fn start(name_prefix: &str, workers: usize, capacity: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            progress: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });

        let handles = (0..workers)
            .map(|i| {
                let inner = inner.clone();
                thread::Builder::new()
                    .name(format!("{name_prefix}-worker-{i}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!(workers, capacity, "worker pool started");
        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue a task, waiting up to `timeout` for queue space.
    pub fn submit(&self, timeout: Duration, task: Task) -> Result<(), SubmitError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().unwrap();

        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                return Err(SubmitError::ShutDown);
            }
            if queue.len() < self.inner.capacity {
                queue.push_back(task);
                self.inner.not_empty.notify_one();
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SubmitError::QueueFull);
            }
            let (guard, _) = self
                .inner
                .progress
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
        }
    }

    /// Tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting in the queue.
    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Graceful stop: reject new work, drop queued-but-unstarted tasks
    /// (their jobs stay locked and expire), wait up to `drain_timeout` for
    /// running tasks, then detach whatever is still running.
    pub fn shutdown(&self, drain_timeout: Duration) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.not_empty.notify_all();
        self.inner.progress.notify_all();

        let dropped = {
            let mut queue = self.inner.queue.lock().unwrap();
            let dropped = queue.len();
            queue.clear();

            let deadline = Instant::now() + drain_timeout;
            while self.inner.active.load(Ordering::SeqCst) > 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .inner
                    .progress
                    .wait_timeout(queue, deadline - now)
                    .unwrap();
                queue = guard;
            }
            dropped
        };

        if dropped > 0 {
            debug!(dropped, "dropped queued tasks at shutdown; their jobs stay locked");
        }

        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // a still-running job is left to complete on its own; its
                // lease expires if the process dies mid-flight
                warn!("worker still busy after drain timeout, detaching");
            }
        }
        info!("worker pool stopped");
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().unwrap();
            loop {
                if inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    // count as active before releasing the lock so the
                    // shutdown drain never sees a task in neither place
                    inner.active.fetch_add(1, Ordering::SeqCst);
                    inner.progress.notify_all();
                    break task;
                }
                queue = inner.not_empty.wait(queue).unwrap();
            }
        };

        let result = catch_unwind(AssertUnwindSafe(task));
        inner.active.fetch_sub(1, Ordering::SeqCst);
        inner.progress.notify_all();

        if result.is_err() {
            error!("worker task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    #[test]
    fn executes_submitted_tasks() {
        let pool = WorkerPool::start("test", 2, 4);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            pool.submit(
                Duration::from_secs(1),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn full_queue_rejects_after_the_timeout() {
        let pool = WorkerPool::start("test", 1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // occupy the single worker
        pool.submit(
            Duration::from_secs(1),
            Box::new(move || {
                let _ = release_rx.recv();
            }),
        )
        .unwrap();
        // wait until the worker picked it up, then fill the queue slot
        let deadline = Instant::now() + Duration::from_secs(1);
        while pool.active_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.submit(Duration::from_millis(50), Box::new(|| {})).unwrap();

        let rejected = pool.submit(Duration::from_millis(50), Box::new(|| {}));
        assert_eq!(rejected, Err(SubmitError::QueueFull));

        release_tx.send(()).unwrap();
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn a_panicking_task_does_not_kill_the_worker() {
        let pool = WorkerPool::start("test", 1, 4);
        let done = Arc::new(AtomicBool::new(false));

        pool.submit(Duration::from_secs(1), Box::new(|| panic!("boom")))
            .unwrap();
        let done_clone = done.clone();
        pool.submit(
            Duration::from_secs(1),
            Box::new(move || done_clone.store(true, Ordering::SeqCst)),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn shutdown_waits_for_the_running_task() {
        let pool = WorkerPool::start("test", 1, 4);
        let finished = Arc::new(AtomicBool::new(false));

        let finished_clone = finished.clone();
        pool.submit(
            Duration::from_secs(1),
            Box::new(move || {
                thread::sleep(Duration::from_millis(150));
                finished_clone.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();
        // let the worker pick the task up
        let deadline = Instant::now() + Duration::from_secs(1);
        while pool.active_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        pool.shutdown(Duration::from_secs(2));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn submitting_after_shutdown_is_rejected() {
        let pool = WorkerPool::start("test", 1, 4);
        pool.shutdown(Duration::from_millis(100));

        let result = pool.submit(Duration::from_millis(50), Box::new(|| {}));
        assert_eq!(result, Err(SubmitError::ShutDown));
    }
}
