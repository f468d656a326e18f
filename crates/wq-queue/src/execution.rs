use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use wq_core::{ElementId, ElementStatus, InputFile, ProgressUpdate, WorkQueueElement};

/// What the execution layer observed for one subscription.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub subscription_id: i64,
    #[serde(default)]
    pub progress: ProgressUpdate,
    /// `Running`, `Done` or `Failed` once the execution layer knows.
    #[serde(default)]
    pub status: Option<ElementStatus>,
    /// Input files the subscription has seen, with their current state.
    #[serde(default)]
    pub files: Vec<InputFile>,
}

/// The local execution subsystem a leaf queue feeds.
pub trait ExecutionBackend: Send + Sync {
    /// Create the subscription that will run the element and return its id.
    fn inject(&self, element: &WorkQueueElement) -> Result<i64>;

    /// Reports accumulated since the previous call.
    fn drain_reports(&self) -> Result<Vec<ExecutionReport>>;

    /// Withdraw a subscription whose injection could not be recorded.
    fn cancel(&self, subscription_id: i64) -> Result<()>;
}

/// Execution backend that only records what it is given. Reports are queued by the
/// caller with [`InMemoryExecution::report`].
#[derive(Default)]
pub struct InMemoryExecution {
    inner: Mutex<ExecutionInner>,
}

#[derive(Default)]
struct ExecutionInner {
    next_subscription: i64,
    injected: HashMap<i64, ElementId>,
    pending: Vec<ExecutionReport>,
}

impl InMemoryExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose subscription ids continue after `last`, so ids handed out before
    /// a restart are never reused.
    pub fn starting_after(last: i64) -> Self {
        Self {
            inner: Mutex::new(ExecutionInner {
                next_subscription: last.max(0),
                ..Default::default()
            }),
        }
    }

    /// Subscription ids by element, in injection order.
    pub fn injected(&self) -> Vec<(i64, ElementId)> {
        let Ok(inner) = self.inner.lock() else {
            return vec![];
        };
        let mut out: Vec<(i64, ElementId)> = inner.injected.iter().map(|(s, e)| (*s, e.clone())).collect();
        out.sort_by_key(|(s, _)| *s);
        out
    }

    pub fn subscription_of(&self, element: &ElementId) -> Option<i64> {
        self.injected().into_iter().find(|(_, e)| e == element).map(|(s, _)| s)
    }

    pub fn report(&self, report: ExecutionReport) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("execution lock poisoned"))?;
        if !inner.injected.contains_key(&report.subscription_id) {
            return Err(anyhow!("unknown subscription {}", report.subscription_id));
        }
        inner.pending.push(report);
        Ok(())
    }
}

impl ExecutionBackend for InMemoryExecution {
    fn inject(&self, element: &WorkQueueElement) -> Result<i64> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("execution lock poisoned"))?;
        inner.next_subscription += 1;
        let sub = inner.next_subscription;
        inner.injected.insert(sub, element.id.clone());
        Ok(sub)
    }

    fn drain_reports(&self) -> Result<Vec<ExecutionReport>> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("execution lock poisoned"))?;
        Ok(std::mem::take(&mut inner.pending))
    }

    fn cancel(&self, subscription_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("execution lock poisoned"))?;
        inner.injected.remove(&subscription_id);
        inner.pending.retain(|r| r.subscription_id != subscription_id);
        Ok(())
    }
}
