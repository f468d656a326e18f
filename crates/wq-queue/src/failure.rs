use wq_core::StoreError;

/// Classification of a failure to decide between failing the element, retrying on a
/// later tick, or ignoring it. Pure; the synchronizer applies the decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying cannot help (bad spec, no data, no site).
    Terminal,
    /// Outage of a collaborator; the next tick may succeed.
    Transient,
    /// Lost a race to another poller; nothing to do.
    Benign,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureDecision {
    FailElement { reason: String },
    RetryNextTick,
    Ignore,
}

impl FailureClass {
    pub fn of_store(err: &StoreError) -> FailureClass {
        match err {
            e if e.is_race() => FailureClass::Benign,
            StoreError::InvalidElement(_) => FailureClass::Terminal,
            StoreError::ElementNotFound(_) => FailureClass::Benign,
            _ => FailureClass::Transient,
        }
    }
}

pub fn decide(class: FailureClass, reason: impl Into<String>) -> FailureDecision {
    match class {
        FailureClass::Terminal => FailureDecision::FailElement { reason: reason.into() },
        FailureClass::Transient => FailureDecision::RetryNextTick,
        FailureClass::Benign => FailureDecision::Ignore,
    }
}
