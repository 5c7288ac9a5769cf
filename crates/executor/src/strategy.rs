//! Pure per-cycle acquisition planning.
//!
//! The strategy decides how many jobs to request from which engine this
//! cycle and how long to sleep afterwards. It never touches a store; the
//! acquisition runnable feeds it cycle reports and acts on the plan.

use std::time::Duration;

use crate::config::AcquisitionStrategyKind;

/// One engine's share of the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub engine: String,
    pub jobs_to_acquire: usize,
}

/// What actually happened for one engine during a cycle.
#[derive(Debug, Clone)]
pub struct EngineCycleReport {
    pub engine: String,
    pub requested: usize,
    /// Jobs the due-lockable query returned
    pub found: usize,
    /// Jobs whose conditional lock succeeded
    pub locked: usize,
    /// Query failed; excluded from backlog accounting
    pub failed: bool,
}

impl EngineCycleReport {
    pub fn failure(engine: impl Into<String>, requested: usize) -> Self {
        Self {
            engine: engine.into(),
            requested,
            found: 0,
            locked: 0,
            failed: true,
        }
    }

    /// A full page back means the engine likely has more due jobs waiting.
    fn has_backlog(&self) -> bool {
        !self.failed && self.requested > 0 && self.found >= self.requested
    }
}

/// Decides per-cycle request counts and the post-cycle wait.
#[derive(Debug)]
pub struct JobAcquisitionStrategy {
    kind: AcquisitionStrategyKind,
    max_jobs_per_cycle: usize,
    wait_time: Duration,
    engines: Vec<String>,
    cursor: usize,
    reports: Vec<EngineCycleReport>,
}

impl JobAcquisitionStrategy {
    pub fn new(
        kind: AcquisitionStrategyKind,
        max_jobs_per_cycle: usize,
        wait_time: Duration,
    ) -> Self {
        Self {
            kind,
            max_jobs_per_cycle,
            wait_time,
            engines: Vec::new(),
            cursor: 0,
            reports: Vec::new(),
        }
    }

    /// Replace the engine set. Engines registered mid-cycle take part from
    /// the next `plan_cycle` on; an in-progress cycle is never disturbed.
    pub fn reconfigure(&mut self, engines: Vec<String>) {
        self.engines = engines;
    }

    /// Start a new cycle and return the per-engine request counts.
    pub fn plan_cycle(&mut self) -> Vec<AcquisitionRequest> {
        self.reports.clear();

        if self.engines.is_empty() || self.max_jobs_per_cycle == 0 {
            return Vec::new();
        }

        match self.kind {
            AcquisitionStrategyKind::Sequential => {
                let engine = self.engines[self.cursor % self.engines.len()].clone();
                self.cursor = self.cursor.wrapping_add(1);
                vec![AcquisitionRequest {
                    engine,
                    jobs_to_acquire: self.max_jobs_per_cycle,
                }]
            }
            AcquisitionStrategyKind::Simultaneous => {
                let engines = self.engines.len();
                let base = self.max_jobs_per_cycle / engines;
                let remainder = self.max_jobs_per_cycle % engines;
                self.engines
                    .iter()
                    .enumerate()
                    .map(|(i, engine)| AcquisitionRequest {
                        engine: engine.clone(),
                        jobs_to_acquire: base + usize::from(i < remainder),
                    })
                    .filter(|r| r.jobs_to_acquire > 0)
                    .collect()
            }
        }
    }

    /// Record one engine's outcome for the current cycle.
    pub fn record(&mut self, report: EngineCycleReport) {
        self.reports.push(report);
    }

    /// Post-cycle wait: zero as soon as any engine came back with a full
    /// page (backlog likely remains), otherwise the fixed base backoff.
    pub fn wait_time(&self) -> Duration {
        if self.reports.iter().any(EngineCycleReport::has_backlog) {
            Duration::ZERO
        } else {
            self.wait_time
        }
    }
}
