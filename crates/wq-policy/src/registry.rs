use wq_spec::{EndPolicyKind, StartPolicyKind};

use crate::{BlockPolicy, DatasetPolicy, EndPolicy, MonteCarloPolicy, SingleShot, SinglePolicy, StartPolicy};

pub fn start_policy(kind: StartPolicyKind) -> Box<dyn StartPolicy> {
    match kind {
        StartPolicyKind::Block => Box::new(BlockPolicy),
        StartPolicyKind::Dataset => Box::new(DatasetPolicy),
        StartPolicyKind::MonteCarlo => Box::new(MonteCarloPolicy),
        StartPolicyKind::Single => Box::new(SinglePolicy),
    }
}

pub fn end_policy(kind: EndPolicyKind, failure_threshold: f64) -> Box<dyn EndPolicy> {
    match kind {
        EndPolicyKind::SingleShot => Box::new(SingleShot::new(failure_threshold)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_returns_matching_kind() {
        for kind in [
            StartPolicyKind::Block,
            StartPolicyKind::Dataset,
            StartPolicyKind::MonteCarlo,
            StartPolicyKind::Single,
        ] {
            assert_eq!(start_policy(kind).kind(), kind);
        }
        assert_eq!(end_policy(EndPolicyKind::SingleShot, 0.1).kind(), EndPolicyKind::SingleShot);
    }
}
