use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use wq_catalog::{DataLocationService, SiteStatusFeed};
use wq_core::{select_within_budget, sort_for_dispatch, ElementId, ElementStatus, NewElement, StoreError, WorkQueueElement};
use wq_policy::{end_policy, start_policy, EndPolicy, PolicyError, SplitInput};
use wq_sites::{data_locations, DataRef, Resolution, SiteResolver};
use wq_spec::{validate_spec, EndPolicyKind, SpecSource, StartPolicyKind, WmSpec, DEFAULT_FAILURE_THRESHOLD};
use wq_storage::ElementStore;

use crate::error::{SyncError, SyncResult};
use crate::execution::ExecutionBackend;
use crate::failure::{decide, FailureClass, FailureDecision};
use crate::parent::{walk_parent, ParentQueue};

#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// This queue's own URL, recorded on parent elements it claims.
    pub queue_url: String,
    /// Fallback start policy for specs that do not name one.
    pub start_policy: Option<StartPolicyKind>,
    /// Policy used to split aggregate elements pulled from the parent.
    pub expand_policy: StartPolicyKind,
    pub end_policy: EndPolicyKind,
    pub failure_threshold: f64,
}

impl SyncSettings {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            start_policy: None,
            expand_policy: StartPolicyKind::Block,
            end_policy: EndPolicyKind::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Elements offered by the parent within the budget.
    pub fetched: usize,
    /// Parent elements claimed and acknowledged.
    pub acquired: usize,
    /// Local elements created from them.
    pub created: usize,
    pub rolled_back: usize,
    pub failed: usize,
    /// Lost to another child queue.
    pub skipped: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushReport {
    pub groups: usize,
    pub pushed: usize,
    /// Local elements canceled because their parent was canceled.
    pub canceled: usize,
    pub failed: usize,
}

/// Moves work between this queue's store and its parent, and between the store and
/// the local execution layer.
pub struct Synchronizer {
    store: Arc<dyn ElementStore>,
    specs: Arc<dyn SpecSource>,
    catalog: Arc<dyn DataLocationService>,
    sites: Arc<dyn SiteStatusFeed>,
    end: Box<dyn EndPolicy>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn ElementStore>,
        specs: Arc<dyn SpecSource>,
        catalog: Arc<dyn DataLocationService>,
        sites: Arc<dyn SiteStatusFeed>,
        settings: SyncSettings,
    ) -> Self {
        let end = end_policy(settings.end_policy, settings.failure_threshold);
        Self {
            store,
            specs,
            catalog,
            sites,
            end,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ElementStore> {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub(crate) fn resolver(&self) -> SyncResult<SiteResolver> {
        SiteResolver::from_feed(self.sites.as_ref()).map_err(SyncError::Catalog)
    }

    pub(crate) fn resolve(
        &self,
        resolver: &SiteResolver,
        data: DataRef<'_>,
        sites: &BTreeMap<String, bool>,
    ) -> SyncResult<Resolution> {
        let locations = data_locations(self.catalog.as_ref(), data).map_err(SyncError::Catalog)?;
        Ok(resolver.resolve(sites, locations.as_ref(), &BTreeSet::new(), &BTreeSet::new()))
    }

    /// Walk a local element to `target` along legal edges. False when `target` is
    /// unreachable from where the element is now.
    pub fn walk_local(&self, id: &ElementId, target: ElementStatus) -> SyncResult<bool> {
        let current = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::ElementNotFound(id.clone()))?;
        let Some(path) = ElementStatus::path(current.status, target) else {
            return Ok(false);
        };
        for step in path {
            self.store.update_status(std::slice::from_ref(id), step, None)?;
        }
        Ok(true)
    }

    /// Store one candidate with its resolved sites. Unschedulable work is failed at once.
    fn persist(&self, new: NewElement, resolution: Resolution) -> SyncResult<WorkQueueElement> {
        let mut stored = self.store.create(new)?;
        self.store.set_resolved_sites(&stored.id, &resolution.valid_sites)?;
        stored.resolved_sites = resolution.valid_sites.clone();
        if resolution.is_unschedulable() {
            warn!(element = %stored.id, task = %stored.task, "no valid site, failing element");
            self.walk_local(&stored.id, ElementStatus::Failed)?;
            stored.status = ElementStatus::Failed;
        }
        Ok(stored)
    }

    /// Resolve every candidate, then store them. A lookup failure creates nothing.
    fn persist_all(&self, candidates: Vec<NewElement>, resolver: &SiteResolver) -> SyncResult<Vec<WorkQueueElement>> {
        let resolved = candidates
            .into_iter()
            .map(|new| -> SyncResult<(NewElement, Resolution)> {
                let resolution = self.resolve(resolver, DataRef::from(&new), &new.sites)?;
                Ok((new, resolution))
            })
            .collect::<SyncResult<Vec<_>>>()?;
        let mut created = Vec::with_capacity(resolved.len());
        for (new, resolution) in resolved {
            match self.persist(new, resolution) {
                Ok(e) => created.push(e),
                Err(SyncError::Store(e)) if e.is_race() => debug!(error = %e, "element already queued"),
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    fn expand(&self, remote: &WorkQueueElement) -> SyncResult<Vec<NewElement>> {
        let spec = self.specs.load(&remote.spec_ref)?;
        let task = spec.task(&remote.task).ok_or_else(|| PolicyError::WmSpec {
            spec: spec.name.clone(),
            reason: format!("task {} not found", remote.task),
        })?;
        let existing = self.store.get_by_spec(&remote.spec_ref, &remote.task)?;
        let input = SplitInput {
            spec: &spec,
            task,
            catalog: self.catalog.as_ref(),
            existing: &existing,
            parent: Some(remote),
        };
        Ok(start_policy(self.settings.expand_policy).split(&input)?)
    }

    /// Local elements for one pulled parent element.
    fn accept(&self, remote: &WorkQueueElement, resolver: &SiteResolver) -> SyncResult<Vec<WorkQueueElement>> {
        let candidates = if remote.is_aggregate() {
            self.expand(remote)?
        } else {
            vec![NewElement::from_parent(remote)]
        };
        self.persist_all(candidates, resolver)
    }

    /// Cancel open local children of a parent element this queue gave up on.
    fn discard_children(&self, parent_id: &ElementId) -> SyncResult<usize> {
        let open: Vec<ElementId> = self
            .store
            .get_by_parent(parent_id)?
            .into_iter()
            .filter(|c| c.status.is_open())
            .map(|c| c.id)
            .collect();
        if !open.is_empty() {
            self.store.update_status(&open, ElementStatus::Canceled, None)?;
            info!(parent = %parent_id, canceled = open.len(), "discarded local work of released parent");
        }
        Ok(open.len())
    }

    fn release_claim(&self, remote_id: &ElementId) {
        if let Err(e) = self.discard_children(remote_id) {
            warn!(parent = %remote_id, error = %e, "could not discard local children");
        }
    }

    /// Pull available work from `parent` within `max_jobs`.
    ///
    /// Each pulled element is claimed (`Negotiating`), materialized locally, then
    /// acknowledged (`Acquired`). If materializing fails the claim is rolled back, or
    /// the parent element is failed when retrying cannot help.
    pub fn pull_work(&self, parent: &dyn ParentQueue, max_jobs: u64) -> PullReport {
        let mut report = PullReport::default();
        let url = Some(self.settings.queue_url.as_str());
        let work = match parent.available_work(max_jobs) {
            Ok(work) => work,
            Err(e) => {
                warn!(parent = parent.location(), error = %e, "parent queue unavailable, nothing pulled");
                return report;
            }
        };
        let offered = work.len();
        let available: Vec<WorkQueueElement> = work
            .into_iter()
            .filter(|e| e.status == ElementStatus::Available)
            .collect();
        let work = select_within_budget(available, max_jobs);
        if work.len() < offered {
            warn!(
                parent = parent.location(),
                offered,
                kept = work.len(),
                max_jobs,
                "parent returned work outside the request, trimmed"
            );
        }
        report.fetched = work.len();
        if work.is_empty() {
            return report;
        }
        let resolver = match self.resolver() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "site status unavailable, nothing pulled");
                return report;
            }
        };

        for remote in work {
            match parent.update_status(&remote.id, ElementStatus::Negotiating, url) {
                Ok(()) => {}
                Err(e) if e.class() == FailureClass::Benign => {
                    debug!(element = %remote.id, error = %e, "lost claim to another queue");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(element = %remote.id, error = %e, "claim failed, stopping pull");
                    break;
                }
            }

            match self.accept(&remote, &resolver) {
                Ok(created) => {
                    report.created += created.len();
                    match parent.update_status(&remote.id, ElementStatus::Acquired, url) {
                        Ok(()) => report.acquired += 1,
                        Err(e) => warn!(element = %remote.id, error = %e, "acknowledge failed"),
                    }
                    info!(element = %remote.id, created = created.len(), "pulled work");
                }
                Err(err) => match decide(err.class(), err.to_string()) {
                    FailureDecision::FailElement { reason } => {
                        warn!(element = %remote.id, %reason, "pulled element cannot be processed, failing it");
                        self.release_claim(&remote.id);
                        if let Err(e) = walk_parent(parent, &remote.id, ElementStatus::Negotiating, ElementStatus::Failed, url) {
                            warn!(element = %remote.id, error = %e, "could not fail parent element");
                        }
                        report.failed += 1;
                    }
                    FailureDecision::RetryNextTick | FailureDecision::Ignore => {
                        warn!(element = %remote.id, error = %err, "pull rolled back");
                        self.release_claim(&remote.id);
                        if let Err(e) = parent.update_status(&remote.id, ElementStatus::Available, url) {
                            warn!(element = %remote.id, error = %e, "could not release parent element");
                        }
                        report.rolled_back += 1;
                    }
                },
            }
        }
        report
    }

    /// Fold local progress into the parent elements it came from.
    ///
    /// Parents with changed children get progress and status pushed. Parents that only
    /// have open children are checked for cancellation. Settled, reported history is
    /// never scanned.
    pub fn report_to_parent(&self, parent: &dyn ParentQueue) -> SyncResult<PushReport> {
        let mut report = PushReport::default();
        let mut dirty: BTreeSet<ElementId> = BTreeSet::new();
        let mut watched: BTreeSet<ElementId> = BTreeSet::new();
        for e in self.store.get_unreported()? {
            if let (true, Some(pid)) = (e.parent_flag, e.parent_queue_id.as_ref()) {
                if e.status.is_negotiating_or_later() {
                    dirty.insert(pid.clone());
                }
            }
        }
        for status in ElementStatus::ALL.into_iter().filter(|s| s.is_open()) {
            for e in self.store.get_by_status(status, None, None)? {
                if let (true, Some(pid)) = (e.parent_flag, e.parent_queue_id) {
                    watched.insert(pid);
                }
            }
        }

        for parent_id in dirty.union(&watched) {
            match self.push_group(parent, parent_id, dirty.contains(parent_id)) {
                Ok(GroupOutcome::Pushed) => {
                    report.groups += 1;
                    report.pushed += 1;
                }
                Ok(GroupOutcome::Canceled(n)) => {
                    report.groups += 1;
                    report.canceled += n;
                }
                Ok(GroupOutcome::Unchanged) => {}
                Err(e) if e.class() == FailureClass::Benign => {
                    debug!(parent = %parent_id, error = %e, "parent moved on, retrying next tick");
                }
                Err(e) => {
                    warn!(parent = %parent_id, error = %e, "progress report failed");
                    report.failed += 1;
                    if e.class() == FailureClass::Transient {
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    fn push_group(&self, parent: &dyn ParentQueue, parent_id: &ElementId, dirty: bool) -> SyncResult<GroupOutcome> {
        let url = Some(self.settings.queue_url.as_str());
        let children = self.store.get_by_parent(parent_id)?;
        let Some(remote) = parent.get_element(parent_id)? else {
            warn!(parent = %parent_id, "parent element vanished, dropping report");
            self.mark_reported(&children)?;
            return Ok(GroupOutcome::Unchanged);
        };

        if remote.status == ElementStatus::Canceled {
            let open: Vec<ElementId> = children
                .iter()
                .filter(|c| c.status.is_open())
                .map(|c| c.id.clone())
                .collect();
            if !open.is_empty() {
                self.store.update_status(&open, ElementStatus::Canceled, None)?;
                info!(parent = %parent_id, canceled = open.len(), "parent canceled, canceling local work");
            }
            self.mark_reported(&self.store.get_by_parent(parent_id)?)?;
            return Ok(GroupOutcome::Canceled(open.len()));
        }
        if !dirty {
            return Ok(GroupOutcome::Unchanged);
        }

        let outcome = self.end.evaluate(parent_id, &children)?;
        if remote.status.is_open() {
            parent.update_progress(parent_id, &outcome.progress)?;
        }
        if let Some(target) = outcome.target_status() {
            if remote.status != target && !remote.status.is_terminal() {
                if walk_parent(parent, parent_id, remote.status, target, url)? {
                    info!(parent = %parent_id, from = %remote.status, to = %target, "parent status advanced");
                } else {
                    debug!(parent = %parent_id, from = %remote.status, to = %target, "no legal path on parent");
                }
            }
        }
        self.mark_reported(&children)?;
        Ok(GroupOutcome::Pushed)
    }

    fn mark_reported(&self, elements: &[WorkQueueElement]) -> SyncResult<()> {
        for e in elements.iter().filter(|e| e.needs_report()) {
            self.store.mark_reported(&e.id, e.version)?;
        }
        Ok(())
    }

    /// Hand `Available` local elements to the execution layer, each at most once.
    pub fn inject_work(&self, backend: &dyn ExecutionBackend) -> SyncResult<usize> {
        let mut available = self.store.get_by_status(ElementStatus::Available, None, None)?;
        sort_for_dispatch(&mut available);
        let mut injected = 0;
        for e in available {
            if e.subscription_id.is_some() {
                continue;
            }
            let ids = std::slice::from_ref(&e.id);
            match self.store.update_status(ids, ElementStatus::Negotiating, None) {
                Ok(()) => {}
                Err(err) if err.is_race() => {
                    debug!(element = %e.id, "element taken by another poller");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            let subscription = match backend.inject(&e) {
                Ok(subscription) => subscription,
                Err(err) => {
                    warn!(element = %e.id, error = %err, "injection failed, releasing element");
                    self.release_local(&e.id)?;
                    continue;
                }
            };
            match self.store.record_injection(&e.id, subscription) {
                Ok(()) => {
                    info!(element = %e.id, subscription, "injected into execution");
                    injected += 1;
                }
                Err(err) => {
                    warn!(element = %e.id, subscription, error = %err, "could not record injection, withdrawing it");
                    backend.cancel(subscription).map_err(SyncError::Execution)?;
                    self.release_local(&e.id)?;
                }
            }
        }
        Ok(injected)
    }

    /// Put a claimed local element back to `Available` unless it has moved on.
    fn release_local(&self, id: &ElementId) -> SyncResult<()> {
        match self
            .store
            .update_status(std::slice::from_ref(id), ElementStatus::Available, None)
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_race() => {
                debug!(element = %id, error = %err, "element moved on before release");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Highest subscription id recorded on any element, or 0.
    pub fn last_subscription_id(&self) -> SyncResult<i64> {
        let mut last = 0;
        for status in ElementStatus::ALL {
            for e in self.store.get_by_status(status, None, None)? {
                last = last.max(e.subscription_id.unwrap_or(0));
            }
        }
        Ok(last)
    }

    /// Apply execution reports to the elements they belong to.
    pub fn ingest_reports(&self, backend: &dyn ExecutionBackend) -> SyncResult<usize> {
        let reports = backend.drain_reports().map_err(SyncError::Execution)?;
        if reports.is_empty() {
            return Ok(0);
        }
        let mut by_subscription: HashMap<i64, ElementId> = HashMap::new();
        for status in [ElementStatus::Acquired, ElementStatus::Running] {
            for e in self.store.get_by_status(status, None, None)? {
                if let Some(sub) = e.subscription_id {
                    by_subscription.insert(sub, e.id);
                }
            }
        }

        let mut applied = 0;
        for r in reports {
            let Some(id) = by_subscription.get(&r.subscription_id) else {
                debug!(subscription = r.subscription_id, "report for unknown or finished subscription");
                continue;
            };
            if !r.files.is_empty() {
                self.store.add_input_files(id, &r.files)?;
            }
            if !r.progress.is_empty() {
                self.store.update_progress(std::slice::from_ref(id), &r.progress)?;
            }
            if let Some(target) = r.status {
                if !self.walk_local(id, target)? {
                    debug!(element = %id, %target, "status report not applicable");
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Split every task of `spec` into root elements of this queue.
    pub fn queue_work(&self, spec: &WmSpec) -> SyncResult<Vec<WorkQueueElement>> {
        validate_spec(spec)?;
        let resolver = self.resolver()?;
        let mut created = vec![];
        for task in &spec.tasks {
            let kind = spec
                .policy
                .start
                .or(self.settings.start_policy)
                .unwrap_or_else(|| spec.start_policy_for(task));
            let existing = self.store.get_by_spec(&spec.name, &spec.task_path(task))?;
            let input = SplitInput {
                spec,
                task,
                catalog: self.catalog.as_ref(),
                existing: &existing,
                parent: None,
            };
            let candidates = start_policy(kind).split(&input)?;
            created.extend(self.persist_all(candidates, &resolver)?);
        }
        info!(spec = %spec.name, created = created.len(), "queued work");
        Ok(created)
    }
}

enum GroupOutcome {
    Pushed,
    Canceled(usize),
    Unchanged,
}
