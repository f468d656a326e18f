use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use wq_core::{
    Clock, ElementId, ElementStatus, FileState, InputFile, NewElement, ProgressUpdate, StoreError, SystemClock,
    WorkQueueElement,
};

use crate::traits::{in_window, ElementStore, StoreResult};

/// In-memory store. Not durable; used by tests and by in-process queue hierarchies.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Inner {
    elements: HashMap<ElementId, WorkQueueElement>,
    files: HashMap<ElementId, Vec<InputFile>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("in-memory store lock poisoned")))
    }

    fn select(&self, pred: impl Fn(&WorkQueueElement) -> bool) -> StoreResult<Vec<WorkQueueElement>> {
        let inner = self.lock()?;
        let mut out: Vec<WorkQueueElement> = inner.elements.values().filter(|e| pred(e)).cloned().collect();
        out.sort_by(|a, b| a.insert_time.cmp(&b.insert_time).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

impl Inner {
    fn element_mut(&mut self, id: &ElementId) -> StoreResult<&mut WorkQueueElement> {
        self.elements.get_mut(id).ok_or_else(|| StoreError::ElementNotFound(id.clone()))
    }
}

impl ElementStore for InMemoryStore {
    fn create(&self, element: NewElement) -> StoreResult<WorkQueueElement> {
        element.validate()?;
        let mut inner = self.lock()?;
        let key = element.dedup_key();
        if inner.elements.values().any(|e| e.status.is_open() && e.dedup_key() == key) {
            return Err(StoreError::DuplicateElement {
                spec_ref: key.spec_ref,
                task: key.task,
                data_item: key.data_item,
            });
        }
        let stored = WorkQueueElement::from_new(element, ElementId::new(), self.clock.now());
        inner.elements.insert(stored.id.clone(), stored.clone());
        tracing::debug!(element = %stored.id, task = %stored.task, "element created");
        Ok(stored)
    }

    fn get(&self, id: &ElementId) -> StoreResult<Option<WorkQueueElement>> {
        Ok(self.lock()?.elements.get(id).cloned())
    }

    fn get_by_status(
        &self,
        status: ElementStatus,
        since: Option<i64>,
        before: Option<i64>,
    ) -> StoreResult<Vec<WorkQueueElement>> {
        self.select(|e| e.status == status && in_window(e.update_time, since, before))
    }

    fn get_by_parent(&self, parent_queue_id: &ElementId) -> StoreResult<Vec<WorkQueueElement>> {
        self.select(|e| e.parent_queue_id.as_ref() == Some(parent_queue_id))
    }

    fn get_by_spec(&self, spec_ref: &str, task: &str) -> StoreResult<Vec<WorkQueueElement>> {
        self.select(|e| e.spec_ref == spec_ref && e.task == task)
    }

    fn update_status(&self, ids: &[ElementId], status: ElementStatus, child_queue_url: Option<&str>) -> StoreResult<()> {
        let mut inner = self.lock()?;
        // validate everything before touching anything
        for id in ids {
            let current = inner.elements.get(id).ok_or_else(|| StoreError::ElementNotFound(id.clone()))?;
            if !current.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: id.clone(),
                    from: current.status,
                    to: status,
                });
            }
        }
        let now = self.clock.now();
        for id in ids {
            let e = inner.element_mut(id)?;
            e.status = status;
            e.update_time = now;
            e.version += 1;
            if let Some(url) = child_queue_url {
                e.child_queue_url = Some(url.to_string());
            }
        }
        Ok(())
    }

    fn update_progress(&self, ids: &[ElementId], values: &ProgressUpdate) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock()?;
        for id in ids {
            if !inner.elements.contains_key(id) {
                return Err(StoreError::ElementNotFound(id.clone()));
            }
        }
        let now = self.clock.now();
        for id in ids {
            let e = inner.element_mut(id)?;
            if e.status.is_terminal() {
                continue;
            }
            let merged = e.progress.merge(values);
            if merged != e.progress {
                e.progress = merged;
                e.update_time = now;
                e.version += 1;
            }
        }
        Ok(())
    }

    fn count_by_status(&self, status: ElementStatus, since: Option<i64>, before: Option<i64>) -> StoreResult<u64> {
        let inner = self.lock()?;
        Ok(inner
            .elements
            .values()
            .filter(|e| e.status == status && in_window(e.update_time, since, before))
            .count() as u64)
    }

    fn set_sites(&self, id: &ElementId, sites: &BTreeMap<String, bool>) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.element_mut(id)?.sites = sites.clone();
        Ok(())
    }

    fn set_resolved_sites(&self, id: &ElementId, sites: &BTreeSet<String>) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.element_mut(id)?.resolved_sites = sites.clone();
        Ok(())
    }

    fn set_subscription(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let e = inner.element_mut(id)?;
        match e.subscription_id {
            Some(existing) if existing != subscription_id => Err(StoreError::InvalidElement(format!(
                "element {id} already linked to subscription {existing}"
            ))),
            _ => {
                e.subscription_id = Some(subscription_id);
                Ok(())
            }
        }
    }

    fn record_injection(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let e = inner.element_mut(id)?;
        if e.status != ElementStatus::Negotiating {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: e.status,
                to: ElementStatus::Acquired,
            });
        }
        if let Some(existing) = e.subscription_id.filter(|s| *s != subscription_id) {
            return Err(StoreError::InvalidElement(format!(
                "element {id} already linked to subscription {existing}"
            )));
        }
        e.subscription_id = Some(subscription_id);
        e.status = ElementStatus::Acquired;
        e.update_time = now;
        e.version += 1;
        Ok(())
    }

    fn get_unreported(&self) -> StoreResult<Vec<WorkQueueElement>> {
        self.select(|e| e.needs_report())
    }

    fn mark_reported(&self, id: &ElementId, version: u64) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let e = inner.element_mut(id)?;
        e.reported_version = e.reported_version.max(version.min(e.version));
        Ok(())
    }

    fn add_input_files(&self, id: &ElementId, files: &[InputFile]) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.element_mut(id)?;
        let existing = inner.files.entry(id.clone()).or_default();
        for f in files {
            match existing.iter_mut().find(|x| x.lfn == f.lfn) {
                Some(x) => *x = f.clone(),
                None => existing.push(f.clone()),
            }
        }
        Ok(())
    }

    fn input_files(&self, id: &ElementId) -> StoreResult<Vec<InputFile>> {
        let inner = self.lock()?;
        Ok(inner.files.get(id).cloned().unwrap_or_default())
    }

    fn set_file_state(&self, id: &ElementId, lfns: &[String], state: FileState) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.element_mut(id)?;
        if let Some(files) = inner.files.get_mut(id) {
            for f in files.iter_mut().filter(|f| lfns.contains(&f.lfn)) {
                f.state = state;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::run_store_contract_suite;
    use wq_core::ManualClock;

    #[test]
    fn in_memory_store_contract() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = InMemoryStore::with_clock(clock.clone());
        run_store_contract_suite(&store, clock.as_ref()).unwrap();
    }

    #[test]
    fn test_new_creates_empty_store() {
        let store = InMemoryStore::new();
        for status in ElementStatus::ALL {
            assert_eq!(store.count_by_status(status, None, None).unwrap(), 0);
        }
    }

    #[test]
    fn test_get_missing_element() {
        let store = InMemoryStore::new();
        assert!(store.get(&ElementId::from_str("nope")).unwrap().is_none());
    }
}
