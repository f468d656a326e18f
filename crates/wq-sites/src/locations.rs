use std::collections::BTreeSet;

use anyhow::Result;
use wq_catalog::DataLocationService;
use wq_core::{NewElement, WorkQueueElement};

/// The input-data part of an element, enough to find where its data lives.
#[derive(Clone, Copy, Debug)]
pub struct DataRef<'a> {
    pub data_item: Option<&'a str>,
    pub input_blocks: &'a [String],
    pub generated: bool,
}

impl<'a> From<&'a NewElement> for DataRef<'a> {
    fn from(e: &'a NewElement) -> Self {
        Self {
            data_item: e.data_item.as_deref(),
            input_blocks: &e.input_blocks,
            generated: e.mask.is_some(),
        }
    }
}

impl<'a> From<&'a WorkQueueElement> for DataRef<'a> {
    fn from(e: &'a WorkQueueElement) -> Self {
        Self {
            data_item: e.data_item.as_deref(),
            input_blocks: &e.input_blocks,
            generated: e.mask.is_some(),
        }
    }
}

/// Sites holding a replica of the element's input, or `None` for work without input.
///
/// Multi-block elements use the union of their blocks' locations; each block is
/// resolved again once the element is split.
pub fn data_locations(catalog: &dyn DataLocationService, data: DataRef<'_>) -> Result<Option<BTreeSet<String>>> {
    if data.generated {
        return Ok(None);
    }
    if !data.input_blocks.is_empty() {
        let mut locations = BTreeSet::new();
        for block in data.input_blocks {
            locations.extend(catalog.block_locations(block)?);
        }
        return Ok(Some(locations));
    }
    match data.data_item {
        None => Ok(None),
        Some(block) if block.contains('#') => Ok(Some(catalog.block_locations(block)?)),
        Some(dataset) => {
            let locations = catalog
                .list_blocks(dataset)?
                .into_iter()
                .flat_map(|b| b.locations)
                .collect();
            Ok(Some(locations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wq_catalog::StaticCatalog;
    use wq_core::{Block, EventMask};

    fn catalog() -> StaticCatalog {
        let c = StaticCatalog::new();
        for (name, site) in [("/A/B/RAW#1", "T1"), ("/A/B/RAW#2", "T2")] {
            c.add_block(Block {
                name: name.into(),
                dataset: "/A/B/RAW".into(),
                size: 1,
                num_events: 1,
                num_files: 1,
                locations: BTreeSet::from([site.to_string()]),
                open: false,
            });
        }
        c
    }

    #[test]
    fn block_dataset_and_generated_locations() {
        let c = catalog();
        let block = NewElement::new("s", "/s/t").with_data_item("/A/B/RAW#1");
        assert_eq!(
            data_locations(&c, (&block).into()).unwrap(),
            Some(BTreeSet::from(["T1".to_string()]))
        );

        let dataset = NewElement::new("s", "/s/t").with_data_item("/A/B/RAW");
        assert_eq!(data_locations(&c, (&dataset).into()).unwrap().unwrap().len(), 2);

        let mut mc = NewElement::new("s", "/s/t");
        mc.mask = Some(EventMask { first_event: 1, last_event: 10 });
        mc.data_item = Some("events:1-10".into());
        assert_eq!(data_locations(&c, (&mc).into()).unwrap(), None);
    }

    #[test]
    fn unknown_block_is_an_error() {
        let c = catalog();
        let e = NewElement::new("s", "/s/t").with_data_item("/X/Y/RAW#9");
        assert!(data_locations(&c, (&e).into()).is_err());
    }
}
