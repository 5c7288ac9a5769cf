//! Executor and acquisition configuration.

use std::time::Duration;

use uuid::Uuid;

/// How an acquisition distributes its per-cycle budget across engines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionStrategyKind {
    /// Poll one engine per cycle, round-robin.
    Sequential,
    /// Poll every engine each cycle, apportioning the budget evenly.
    Simultaneous,
}

/// Per-acquisition configuration, immutable once the acquisition thread runs.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Lease owner token written into acquired jobs; stable per process
    pub lock_owner: String,
    /// How long an acquired lease lasts
    pub lock_duration: Duration,
    /// Upper bound of jobs requested per cycle
    pub max_jobs_per_cycle: usize,
    /// Base backoff between idle cycles
    pub wait_time: Duration,
    pub strategy: AcquisitionStrategyKind,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            lock_owner: Uuid::now_v7().to_string(),
            lock_duration: Duration::from_secs(5 * 60),
            max_jobs_per_cycle: 3,
            wait_time: Duration::from_secs(5),
            strategy: AcquisitionStrategyKind::Sequential,
        }
    }
}

impl AcquisitionConfig {
    pub fn with_lock_owner(mut self, lock_owner: impl Into<String>) -> Self {
        self.lock_owner = lock_owner.into();
        self
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn with_max_jobs_per_cycle(mut self, max: usize) -> Self {
        self.max_jobs_per_cycle = max;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_strategy(mut self, strategy: AcquisitionStrategyKind) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Platform-wide executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Fixed worker pool size, shared by every engine and acquisition
    pub worker_threads: usize,
    /// Bounded submission queue in front of the pool
    pub queue_capacity: usize,
    /// How long a submission may wait for queue space before it is dropped
    pub submission_timeout: Duration,
    /// How long shutdown waits for in-flight executions
    pub shutdown_timeout: Duration,
    /// Pushed onto a failed job's due date while retries remain
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            queue_capacity: 8,
            submission_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(10),
            retry_backoff: Duration::ZERO,
        }
    }
}

impl ExecutorConfig {
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}
