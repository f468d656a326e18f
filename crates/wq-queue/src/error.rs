use thiserror::Error;
use wq_core::{ElementId, StoreError};
use wq_policy::PolicyError;
use wq_spec::SpecError;

use crate::failure::FailureClass;

/// Failures talking to a parent queue.
#[derive(Debug, Error)]
pub enum ParentError {
    /// Network failure, timeout, or a server-side error. Retried next tick.
    #[error("parent queue {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The parent refused the request, usually because another child won the race.
    #[error("parent queue rejected request for {id}: {reason}")]
    Rejected { id: ElementId, reason: String },

    #[error("parent queue returned an unreadable response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ParentError {
    pub fn class(&self) -> FailureClass {
        match self {
            ParentError::Unreachable { .. } | ParentError::Protocol(_) => FailureClass::Transient,
            ParentError::Rejected { .. } => FailureClass::Benign,
            ParentError::Store(e) => FailureClass::of_store(e),
        }
    }
}

/// Anything that can go wrong while synchronizing one element.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Parent(#[from] ParentError),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] anyhow::Error),

    #[error("execution backend failed: {0}")]
    Execution(#[source] anyhow::Error),

    #[error("element {0} has no valid site")]
    NoValidSites(ElementId),
}

impl SyncError {
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::Store(e) => FailureClass::of_store(e),
            SyncError::Policy(e) if e.is_terminal() => FailureClass::Terminal,
            SyncError::Policy(PolicyError::MismatchedParent { .. }) => FailureClass::Terminal,
            SyncError::Policy(_) => FailureClass::Transient,
            SyncError::Spec(SpecError::Io { .. }) => FailureClass::Transient,
            SyncError::Spec(_) => FailureClass::Terminal,
            SyncError::Parent(e) => e.class(),
            SyncError::Catalog(_) | SyncError::Execution(_) => FailureClass::Transient,
            SyncError::NoValidSites(_) => FailureClass::Terminal,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
