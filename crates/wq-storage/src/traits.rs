use std::collections::{BTreeMap, BTreeSet};

use wq_core::{ElementId, ElementStatus, FileState, InputFile, NewElement, ProgressUpdate, StoreError, WorkQueueElement};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of work-queue elements.
///
/// Every mutating call is synchronous and atomic per call. Reads are snapshots and
/// never hold a lock past the call.
pub trait ElementStore: Send + Sync {
    /// Store a new element as `Available`. Fails with `DuplicateElement` when an open
    /// element with the same spec, task and data item exists.
    fn create(&self, element: NewElement) -> StoreResult<WorkQueueElement>;

    fn get(&self, id: &ElementId) -> StoreResult<Option<WorkQueueElement>>;

    /// Elements in `status` with `since <= update_time < before`.
    fn get_by_status(&self, status: ElementStatus, since: Option<i64>, before: Option<i64>)
        -> StoreResult<Vec<WorkQueueElement>>;

    fn get_by_parent(&self, parent_queue_id: &ElementId) -> StoreResult<Vec<WorkQueueElement>>;

    fn get_by_spec(&self, spec_ref: &str, task: &str) -> StoreResult<Vec<WorkQueueElement>>;

    /// Move every id to `status`, or none of them.
    fn update_status(&self, ids: &[ElementId], status: ElementStatus, child_queue_url: Option<&str>)
        -> StoreResult<()>;

    /// Merge a progress observation into open elements. Empty `ids` is a no-op.
    fn update_progress(&self, ids: &[ElementId], values: &ProgressUpdate) -> StoreResult<()>;

    fn count_by_status(&self, status: ElementStatus, since: Option<i64>, before: Option<i64>) -> StoreResult<u64>;

    /// Replace the white/black-list records of an element.
    fn set_sites(&self, id: &ElementId, sites: &BTreeMap<String, bool>) -> StoreResult<()>;

    fn set_resolved_sites(&self, id: &ElementId, sites: &BTreeSet<String>) -> StoreResult<()>;

    /// Link the element to its execution subscription. The link is set once.
    fn set_subscription(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()>;

    /// Link a `Negotiating` element to its subscription and move it to `Acquired` in
    /// one step. Nothing changes when either half is refused.
    fn record_injection(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()>;

    /// Elements changed since they were last reported to the parent queue.
    fn get_unreported(&self) -> StoreResult<Vec<WorkQueueElement>>;

    /// Record that `version` of the element has been pushed to the parent queue.
    fn mark_reported(&self, id: &ElementId, version: u64) -> StoreResult<()>;

    fn add_input_files(&self, id: &ElementId, files: &[InputFile]) -> StoreResult<()>;

    fn input_files(&self, id: &ElementId) -> StoreResult<Vec<InputFile>>;

    fn set_file_state(&self, id: &ElementId, lfns: &[String], state: FileState) -> StoreResult<()>;
}

pub(crate) fn in_window(t: i64, since: Option<i64>, before: Option<i64>) -> bool {
    since.map_or(true, |s| t >= s) && before.map_or(true, |b| t < b)
}
