use thiserror::Error;
use wq_core::ElementId;
use wq_spec::SpecError;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The input resolved to zero usable data. Terminal.
    #[error("no work for {spec} {task}: {reason}")]
    NoWork { spec: String, task: String, reason: String },

    /// The spec cannot be split as written. Terminal.
    #[error("invalid workload spec {spec}: {reason}")]
    WmSpec { spec: String, reason: String },

    #[error("element {child} has parent {actual:?}, expected {expected}")]
    MismatchedParent {
        expected: ElementId,
        child: ElementId,
        actual: Option<ElementId>,
    },

    /// Catalog or spec source could not be reached. Retried next tick.
    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] anyhow::Error),
}

impl PolicyError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PolicyError::NoWork { .. } | PolicyError::WmSpec { .. })
    }
}

impl From<SpecError> for PolicyError {
    fn from(err: SpecError) -> Self {
        match err {
            SpecError::Io { .. } => PolicyError::Catalog(anyhow::Error::new(err)),
            SpecError::Invalid { spec, reason } => PolicyError::WmSpec { spec, reason },
            SpecError::NotFound(spec) => PolicyError::WmSpec {
                spec,
                reason: "spec not found".into(),
            },
            SpecError::Parse(e) => PolicyError::WmSpec {
                spec: "<unparsed>".into(),
                reason: e.to_string(),
            },
        }
    }
}
