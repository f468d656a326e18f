use wq_core::{EventMask, NewElement};
use wq_spec::{Splitting, StartPolicyKind};

use crate::{PolicyError, SplitInput, StartPolicy};

/// Generation work: `total_events` cut into slices of at most `slice_size` jobs.
pub struct MonteCarloPolicy;

impl StartPolicy for MonteCarloPolicy {
    fn kind(&self) -> StartPolicyKind {
        StartPolicyKind::MonteCarlo
    }

    fn split(&self, input: &SplitInput<'_>) -> Result<Vec<NewElement>, PolicyError> {
        let events_per_job = match input.task.splitting {
            Splitting::EventBased { events_per_job } if events_per_job > 0 => events_per_job,
            _ => return Err(input.bad_spec("Monte Carlo tasks must split by a positive events_per_job")),
        };
        let total = match input.task.total_events {
            Some(n) if n > 0 => n,
            _ => return Err(input.bad_spec(format!("task {} has no total_events", input.task.name))),
        };
        let per_element = u64::from(input.spec.policy.slice_size())
            .saturating_mul(events_per_job)
            .max(1);

        let mut candidates = Vec::new();
        let mut first = 1u64;
        while first <= total {
            let last = first.saturating_add(per_element - 1).min(total);
            let mask = EventMask {
                first_event: first,
                last_event: last,
            };
            let mut element = input
                .base_element()
                .with_data_item(mask.label())
                .with_jobs(input.task.splitting.estimate_jobs(mask.num_events(), 0));
            element.mask = Some(mask);
            candidates.push(element);
            match last.checked_add(1) {
                Some(next) => first = next,
                None => break,
            }
        }
        Ok(input.drop_existing(candidates))
    }
}
