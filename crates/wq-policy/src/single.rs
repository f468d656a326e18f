use wq_core::NewElement;
use wq_spec::StartPolicyKind;

use crate::{PolicyError, SplitInput, StartPolicy};

/// Exactly one element for the whole task, never split further.
pub struct SinglePolicy;

impl StartPolicy for SinglePolicy {
    fn kind(&self) -> StartPolicyKind {
        StartPolicyKind::Single
    }

    fn split(&self, input: &SplitInput<'_>) -> Result<Vec<NewElement>, PolicyError> {
        let mut element = input.base_element();
        if input.task.input_dataset.is_some() {
            let blocks = input.usable_blocks()?;
            element.num_jobs = blocks
                .iter()
                .map(|b| input.task.splitting.estimate_jobs(b.num_events, b.num_files))
                .fold(0u32, u32::saturating_add);
            element.input_blocks = blocks.into_iter().map(|b| b.name).collect();
        } else {
            let events = input.task.total_events.unwrap_or(0);
            element.num_jobs = input.task.splitting.estimate_jobs(events, 0).max(1);
        }
        Ok(input.drop_existing(vec![element]))
    }
}
