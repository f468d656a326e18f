use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use wq_core::Block;

/// Read-only view of the data-placement / catalog service.
pub trait DataLocationService: Send + Sync {
    fn list_blocks(&self, dataset: &str) -> Result<Vec<Block>>;
    fn block(&self, name: &str) -> Result<Option<Block>>;

    fn block_locations(&self, name: &str) -> Result<BTreeSet<String>> {
        self.block(name)?
            .map(|b| b.locations)
            .ok_or_else(|| anyhow!("unknown block {name}"))
    }

    fn block_is_open(&self, name: &str) -> Result<bool> {
        self.block(name)?.map(|b| b.open).ok_or_else(|| anyhow!("unknown block {name}"))
    }
}

/// Feed of sites that can currently accept work.
pub trait SiteStatusFeed: Send + Sync {
    fn usable_sites(&self) -> Result<BTreeSet<String>>;
}
