use tracing::debug;
use wq_core::NewElement;
use wq_spec::StartPolicyKind;

use crate::{PolicyError, SplitInput, StartPolicy};

/// One element per input block.
pub struct BlockPolicy;

impl StartPolicy for BlockPolicy {
    fn kind(&self) -> StartPolicyKind {
        StartPolicyKind::Block
    }

    fn split(&self, input: &SplitInput<'_>) -> Result<Vec<NewElement>, PolicyError> {
        let blocks = input.usable_blocks()?;
        let candidates = blocks
            .iter()
            .map(|b| {
                input
                    .base_element()
                    .with_data_item(b.name.clone())
                    .with_jobs(input.task.splitting.estimate_jobs(b.num_events, b.num_files))
            })
            .collect();
        let fresh = input.drop_existing(candidates);
        debug!(task = %input.task_path(), blocks = blocks.len(), new = fresh.len(), "block split");
        Ok(fresh)
    }
}
