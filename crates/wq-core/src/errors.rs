use thiserror::Error;

use crate::{ElementId, ElementStatus};

/// Failures of an element store.
///
/// `InvalidTransition` and `DuplicateElement` signal that another poller won a race;
/// callers treat them as "nothing to do this tick".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("illegal transition for element {id}: {from} -> {to}")]
    InvalidTransition {
        id: ElementId,
        from: ElementStatus,
        to: ElementStatus,
    },

    #[error("an open element already exists for {spec_ref} {task} ({data_item})")]
    DuplicateElement {
        spec_ref: String,
        task: String,
        data_item: String,
    },

    #[error("element {0} not found")]
    ElementNotFound(ElementId),

    #[error("invalid element: {0}")]
    InvalidElement(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_race(&self) -> bool {
        matches!(self, StoreError::InvalidTransition { .. } | StoreError::DuplicateElement { .. })
    }
}
