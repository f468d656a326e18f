use wq_core::NewElement;
use wq_spec::StartPolicyKind;

use crate::{PolicyError, SplitInput, StartPolicy};

/// One aggregate element covering every usable block of the input dataset.
///
/// Child queues split it again with [`crate::BlockPolicy`].
pub struct DatasetPolicy;

impl StartPolicy for DatasetPolicy {
    fn kind(&self) -> StartPolicyKind {
        StartPolicyKind::Dataset
    }

    fn split(&self, input: &SplitInput<'_>) -> Result<Vec<NewElement>, PolicyError> {
        let dataset = input.input_dataset()?;
        let blocks = input.usable_blocks()?;
        let jobs = blocks
            .iter()
            .map(|b| input.task.splitting.estimate_jobs(b.num_events, b.num_files))
            .fold(0u32, u32::saturating_add);
        let mut element = input.base_element().with_data_item(dataset).with_jobs(jobs);
        element.input_blocks = blocks.into_iter().map(|b| b.name).collect();
        Ok(input.drop_existing(vec![element]))
    }
}
