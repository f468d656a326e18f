use serde::{Deserialize, Serialize};
use wq_core::{ElementId, ElementStatus, Progress, WorkQueueElement};

use crate::error::ParentError;

pub type ParentResult<T> = Result<T, ParentError>;

/// The upstream queue as seen by a child queue.
pub trait ParentQueue: Send + Sync {
    /// Where the parent lives, for logs.
    fn location(&self) -> &str;

    /// Available elements fitting in `max_jobs`, in dispatch order.
    fn available_work(&self, max_jobs: u64) -> ParentResult<Vec<WorkQueueElement>>;

    fn get_element(&self, id: &ElementId) -> ParentResult<Option<WorkQueueElement>>;

    /// One legal transition on the parent, recording which child queue owns it.
    fn update_status(&self, id: &ElementId, status: ElementStatus, child_queue_url: Option<&str>) -> ParentResult<()>;

    fn update_progress(&self, id: &ElementId, progress: &Progress) -> ParentResult<()>;
}

/// Body of a status update on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ElementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_queue_url: Option<String>,
}

/// Drive `id` on the parent from `from` to `to`, one legal edge at a time.
///
/// Returns false when no legal path exists (the parent already moved past `to`).
pub fn walk_parent(
    parent: &dyn ParentQueue,
    id: &ElementId,
    from: ElementStatus,
    to: ElementStatus,
    child_queue_url: Option<&str>,
) -> ParentResult<bool> {
    let Some(path) = ElementStatus::path(from, to) else {
        return Ok(false);
    };
    for step in path {
        parent.update_status(id, step, child_queue_url)?;
    }
    Ok(true)
}
