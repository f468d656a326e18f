//! Housekeeping and operator actions on a queue's own elements.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};
use wq_core::{ElementId, ElementStatus, FileState, StoreError, WorkQueueElement};
use wq_sites::{DataRef, Resolution};

use crate::error::SyncResult;
use crate::sync::Synchronizer;

impl Synchronizer {
    /// Fail input files whose parent files were already completed by a sibling
    /// element of the same spec and task. Returns the number of files failed.
    pub fn fail_orphan_files(&self) -> SyncResult<usize> {
        let store = self.store();
        let mut failed = 0;
        for status in [ElementStatus::Available, ElementStatus::Acquired] {
            for element in store.get_by_status(status, None, None)? {
                let files = store.input_files(&element.id)?;
                if files.iter().all(|f| f.parents.is_empty() || f.state.is_final()) {
                    continue;
                }
                let completed = self.completed_by_siblings(&element)?;
                let orphans: Vec<String> = files
                    .iter()
                    .filter(|f| !f.state.is_final())
                    .filter(|f| f.parents.iter().any(|p| completed.contains(p)))
                    .map(|f| f.lfn.clone())
                    .collect();
                if orphans.is_empty() {
                    continue;
                }
                store.set_file_state(&element.id, &orphans, FileState::Failed)?;
                info!(element = %element.id, files = orphans.len(), "failed orphaned input files");
                failed += orphans.len();
            }
        }
        Ok(failed)
    }

    fn completed_by_siblings(&self, element: &WorkQueueElement) -> SyncResult<HashSet<String>> {
        let mut completed = HashSet::new();
        for sibling in self.store().get_by_spec(&element.spec_ref, &element.task)? {
            if sibling.id == element.id {
                continue;
            }
            for f in self.store().input_files(&sibling.id)? {
                if f.state == FileState::Completed {
                    completed.insert(f.lfn);
                }
            }
        }
        Ok(completed)
    }

    /// Elements that have sat in `status` for longer than `interval_secs`.
    pub fn get_expired_elements(
        &self,
        status: ElementStatus,
        interval_secs: i64,
        now: i64,
    ) -> SyncResult<Vec<WorkQueueElement>> {
        Ok(self
            .store()
            .get_by_status(status, None, Some(now.saturating_sub(interval_secs)))?)
    }

    /// Release stale claims: expired `Negotiating` elements go back to `Available`.
    pub fn requeue_expired(&self, interval_secs: i64, now: i64) -> SyncResult<usize> {
        let mut requeued = 0;
        for e in self.get_expired_elements(ElementStatus::Negotiating, interval_secs, now)? {
            match self
                .store()
                .update_status(std::slice::from_ref(&e.id), ElementStatus::Available, None)
            {
                Ok(()) => {
                    warn!(element = %e.id, idle_secs = now - e.update_time, "requeued expired element");
                    requeued += 1;
                }
                Err(err) if err.is_race() => debug!(element = %e.id, "expired element moved meanwhile"),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(requeued)
    }

    /// Cancel open elements. Returns the ids actually canceled; finished elements are
    /// left alone.
    pub fn cancel(&self, ids: &[ElementId]) -> SyncResult<Vec<ElementId>> {
        let mut canceled = vec![];
        for id in ids {
            let e = self
                .store()
                .get(id)?
                .ok_or_else(|| StoreError::ElementNotFound(id.clone()))?;
            if e.status.is_terminal() {
                debug!(element = %id, status = %e.status, "already finished, not canceling");
                continue;
            }
            match self
                .store()
                .update_status(std::slice::from_ref(id), ElementStatus::Canceled, None)
            {
                Ok(()) => canceled.push(id.clone()),
                Err(err) if err.is_race() => debug!(element = %id, "finished before cancel"),
                Err(err) => return Err(err.into()),
            }
        }
        info!(requested = ids.len(), canceled = canceled.len(), "cancel");
        Ok(canceled)
    }

    /// Recompute the valid sites of an element against current site status and data
    /// placement. An open element left without a site is failed.
    pub fn revalidate_sites(&self, id: &ElementId) -> SyncResult<Resolution> {
        let e = self
            .store()
            .get(id)?
            .ok_or_else(|| StoreError::ElementNotFound(id.clone()))?;
        let resolver = self.resolver()?;
        let resolution = self.resolve(&resolver, DataRef::from(&e), &e.sites)?;
        self.store().set_resolved_sites(id, &resolution.valid_sites)?;
        if resolution.is_unschedulable() && e.status.is_open() {
            warn!(element = %id, "no valid site left after revalidation, failing element");
            self.fail_element(id)?;
        }
        Ok(resolution)
    }

    /// Drive an element to `Failed` through whatever legal steps remain.
    pub fn fail_element(&self, id: &ElementId) -> SyncResult<bool> {
        self.walk_local(id, ElementStatus::Failed)
    }

    pub fn status_counts(&self) -> SyncResult<BTreeMap<ElementStatus, u64>> {
        let mut counts = BTreeMap::new();
        for status in ElementStatus::ALL {
            counts.insert(status, self.store().count_by_status(status, None, None)?);
        }
        Ok(counts)
    }
}
