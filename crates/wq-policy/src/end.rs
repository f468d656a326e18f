use wq_core::{ElementId, ElementStatus, Progress, WorkQueueElement};
use wq_spec::EndPolicyKind;

use crate::PolicyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndDecision {
    Done,
    Failed,
    NoChange,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EndOutcome {
    pub decision: EndDecision,
    /// Job-weighted progress of the counted children.
    pub progress: Progress,
    /// At least one counted child has started running.
    pub started: bool,
}

impl EndOutcome {
    /// Status the parent element should end up in, if any.
    pub fn target_status(&self) -> Option<ElementStatus> {
        match self.decision {
            EndDecision::Done => Some(ElementStatus::Done),
            EndDecision::Failed => Some(ElementStatus::Failed),
            EndDecision::NoChange if self.started => Some(ElementStatus::Running),
            EndDecision::NoChange => None,
        }
    }
}

/// Folds the children of one parent element into a decision for the parent.
pub trait EndPolicy: Send + Sync {
    fn kind(&self) -> EndPolicyKind;
    fn evaluate(&self, parent_id: &ElementId, children: &[WorkQueueElement]) -> Result<EndOutcome, PolicyError>;
}

/// Done when every child is done; failed once the failed share of jobs passes the
/// threshold. Canceled children are skipped.
///
/// A group that has settled with a few failures under the threshold stays
/// `NoChange`: the parent shows `Running` with full progress, and closing it is left
/// to whoever owns the parent element.
pub struct SingleShot {
    pub failure_threshold: f64,
}

impl SingleShot {
    pub fn new(failure_threshold: f64) -> Self {
        Self {
            failure_threshold: failure_threshold.clamp(0.0, 1.0),
        }
    }
}

impl EndPolicy for SingleShot {
    fn kind(&self) -> EndPolicyKind {
        EndPolicyKind::SingleShot
    }

    fn evaluate(&self, parent_id: &ElementId, children: &[WorkQueueElement]) -> Result<EndOutcome, PolicyError> {
        if let Some(stray) = children.iter().find(|c| c.parent_queue_id.as_ref() != Some(parent_id)) {
            return Err(PolicyError::MismatchedParent {
                expected: parent_id.clone(),
                child: stray.id.clone(),
                actual: stray.parent_queue_id.clone(),
            });
        }

        let counted: Vec<&WorkQueueElement> =
            children.iter().filter(|c| c.status != ElementStatus::Canceled).collect();
        let progress = Progress::weighted(counted.iter().map(|c| (c.num_jobs, &c.progress)));
        let started = counted
            .iter()
            .any(|c| matches!(c.status, ElementStatus::Running | ElementStatus::Done | ElementStatus::Failed));

        if counted.is_empty() {
            return Ok(EndOutcome {
                decision: EndDecision::NoChange,
                progress,
                started,
            });
        }

        let jobs = |c: &&WorkQueueElement| u64::from(c.num_jobs.max(1));
        let total_jobs: u64 = counted.iter().map(jobs).sum();
        let failed_jobs: u64 = counted
            .iter()
            .filter(|c| c.status == ElementStatus::Failed)
            .map(jobs)
            .sum();

        let decision = if counted.iter().all(|c| c.status == ElementStatus::Done) {
            EndDecision::Done
        } else if failed_jobs as f64 / total_jobs as f64 > self.failure_threshold {
            EndDecision::Failed
        } else {
            EndDecision::NoChange
        };

        Ok(EndOutcome {
            decision,
            progress,
            started,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wq_core::NewElement;

    fn child(parent: &str, item: &str, jobs: u32, status: ElementStatus) -> WorkQueueElement {
        let mut e = WorkQueueElement::from_new(
            NewElement::new("s", "/s/t")
                .with_data_item(item)
                .with_jobs(jobs)
                .with_parent(ElementId::from_str(parent)),
            ElementId::new(),
            0,
        );
        e.status = status;
        e
    }

    #[test]
    fn failure_share_is_job_weighted() {
        let p = ElementId::from_str("P");
        // one failed element out of four, but it holds 10 of 13 jobs
        let children = vec![
            child("P", "a", 10, ElementStatus::Failed),
            child("P", "b", 1, ElementStatus::Running),
            child("P", "c", 1, ElementStatus::Running),
            child("P", "d", 1, ElementStatus::Running),
        ];
        let out = SingleShot::new(0.5).evaluate(&p, &children).unwrap();
        assert_eq!(out.decision, EndDecision::Failed);
        assert_eq!(out.target_status(), Some(ElementStatus::Failed));
    }

    #[test]
    fn small_failure_share_is_tolerated() {
        let p = ElementId::from_str("P");
        let children = vec![
            child("P", "a", 1, ElementStatus::Failed),
            child("P", "b", 20, ElementStatus::Running),
        ];
        let out = SingleShot::new(0.1).evaluate(&p, &children).unwrap();
        assert_eq!(out.decision, EndDecision::NoChange);
        assert_eq!(out.target_status(), Some(ElementStatus::Running));
    }

    #[test]
    fn settled_group_under_threshold_stays_running_at_full_progress() {
        let p = ElementId::from_str("P");
        let mut children = vec![
            child("P", "a", 1, ElementStatus::Failed),
            child("P", "b", 20, ElementStatus::Done),
        ];
        for c in &mut children {
            c.progress.percent_complete = 100;
        }
        let out = SingleShot::new(0.1).evaluate(&p, &children).unwrap();
        assert_eq!(out.decision, EndDecision::NoChange);
        assert_eq!(out.target_status(), Some(ElementStatus::Running));
        assert_eq!(out.progress.percent_complete, 100);
    }

    #[test]
    fn canceled_children_are_skipped() {
        let p = ElementId::from_str("P");
        let children = vec![
            child("P", "a", 5, ElementStatus::Done),
            child("P", "b", 5, ElementStatus::Canceled),
        ];
        let out = SingleShot::new(0.0).evaluate(&p, &children).unwrap();
        assert_eq!(out.decision, EndDecision::Done);
    }

    #[test]
    fn untouched_children_leave_parent_alone() {
        let p = ElementId::from_str("P");
        let children = vec![child("P", "a", 5, ElementStatus::Acquired)];
        let out = SingleShot::new(0.1).evaluate(&p, &children).unwrap();
        assert_eq!(out.target_status(), None);
    }

    #[test]
    fn mismatched_parent_is_rejected() {
        let p = ElementId::from_str("P");
        let children = vec![child("P", "a", 1, ElementStatus::Done), child("Q", "b", 1, ElementStatus::Done)];
        let err = SingleShot::new(0.1).evaluate(&p, &children).unwrap_err();
        assert!(matches!(err, PolicyError::MismatchedParent { .. }));
    }
}
