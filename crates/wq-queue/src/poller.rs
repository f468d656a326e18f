use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wq_core::{now_unix, ElementStatus};

use crate::execution::ExecutionBackend;
use crate::parent::ParentQueue;
use crate::sync::{PullReport, PushReport, Synchronizer};

pub const DEFAULT_MAX_JOBS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct PollerSettings {
    /// Job budget of one pull.
    pub max_jobs: u64,
    /// Seconds a `Negotiating` element may sit before it counts as expired.
    pub expiry_interval: Option<i64>,
    /// Put expired `Negotiating` elements back to `Available`.
    pub requeue_expired: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            expiry_interval: None,
            requeue_expired: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pull: PullReport,
    pub injected: usize,
    pub reports_applied: usize,
    pub push: PushReport,
    pub orphan_files: usize,
    pub expired: usize,
    pub requeued: usize,
    /// Stages that failed this tick; each was logged.
    pub errors: usize,
}

/// One queue's periodic driver.
pub struct Poller {
    sync: Synchronizer,
    parent: Option<Box<dyn ParentQueue>>,
    execution: Option<Arc<dyn ExecutionBackend>>,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(sync: Synchronizer, settings: PollerSettings) -> Self {
        Self {
            sync,
            parent: None,
            execution: None,
            settings,
        }
    }

    pub fn with_parent(mut self, parent: Box<dyn ParentQueue>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_execution(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.execution = Some(backend);
        self
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Run every stage once. Stage failures are logged and counted, never raised.
    pub fn tick(&self, now: i64) -> TickReport {
        let mut report = TickReport::default();

        if let Some(parent) = &self.parent {
            report.pull = self.sync.pull_work(parent.as_ref(), self.settings.max_jobs);
        }

        if let Some(backend) = &self.execution {
            match self.sync.inject_work(backend.as_ref()) {
                Ok(n) => report.injected = n,
                Err(e) => {
                    warn!(error = %e, "injection stage failed");
                    report.errors += 1;
                }
            }
            match self.sync.ingest_reports(backend.as_ref()) {
                Ok(n) => report.reports_applied = n,
                Err(e) => {
                    warn!(error = %e, "execution report stage failed");
                    report.errors += 1;
                }
            }
        }

        if let Some(parent) = &self.parent {
            match self.sync.report_to_parent(parent.as_ref()) {
                Ok(push) => report.push = push,
                Err(e) => {
                    warn!(error = %e, "report stage failed");
                    report.errors += 1;
                }
            }
        }

        match self.sync.fail_orphan_files() {
            Ok(n) => report.orphan_files = n,
            Err(e) => {
                warn!(error = %e, "orphan file check failed");
                report.errors += 1;
            }
        }

        if let Some(interval) = self.settings.expiry_interval {
            match self.expire(interval, now, &mut report) {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "expiry check failed");
                    report.errors += 1;
                }
            }
        }

        debug!(?report, "tick");
        report
    }

    fn expire(&self, interval: i64, now: i64, report: &mut TickReport) -> crate::SyncResult<()> {
        let expired = self
            .sync
            .get_expired_elements(ElementStatus::Negotiating, interval, now)?;
        report.expired = expired.len();
        for e in &expired {
            warn!(element = %e.id, since = e.update_time, "element stuck in Negotiating");
        }
        if self.settings.requeue_expired && !expired.is_empty() {
            report.requeued = self.sync.requeue_expired(interval, now)?;
        }
        Ok(())
    }

    /// Tick every `interval` until `shutdown` is set.
    pub fn run(&self, interval: Duration, shutdown: &AtomicBool) {
        info!(interval_secs = interval.as_secs(), "poller started");
        let slice = Duration::from_millis(200).min(interval);
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let report = self.tick(now_unix());
            if report.pull.acquired > 0 || report.push.pushed > 0 || report.injected > 0 {
                info!(
                    pulled = report.pull.acquired,
                    injected = report.injected,
                    pushed = report.push.pushed,
                    "tick"
                );
            }
            while started.elapsed() < interval && !shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(slice);
            }
        }
        info!("poller stopped");
    }
}
