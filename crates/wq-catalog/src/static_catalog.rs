use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wq_core::{Block, Site};

use crate::{DataLocationService, SiteStatusFeed};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Catalog and site feed backed by a YAML file or filled in by hand.
#[derive(Default)]
pub struct StaticCatalog {
    blocks: RwLock<BTreeMap<String, Block>>,
    sites: RwLock<BTreeMap<String, bool>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
        let file: CatalogFile = serde_yaml::from_str(&s).with_context(|| "parse catalog yaml")?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: CatalogFile) -> Self {
        let catalog = Self::new();
        for b in file.blocks {
            catalog.add_block(b);
        }
        for s in file.sites {
            catalog.set_site(&s.name, s.usable);
        }
        catalog
    }

    pub fn add_block(&self, block: Block) {
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.insert(block.name.clone(), block);
    }

    pub fn set_site(&self, name: &str, usable: bool) {
        let mut sites = self.sites.write().unwrap_or_else(|e| e.into_inner());
        sites.insert(name.to_string(), usable);
    }
}

impl DataLocationService for StaticCatalog {
    fn list_blocks(&self, dataset: &str) -> Result<Vec<Block>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        Ok(blocks.values().filter(|b| b.dataset == dataset).cloned().collect())
    }

    fn block(&self, name: &str) -> Result<Option<Block>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        Ok(blocks.get(name).cloned())
    }
}

impl SiteStatusFeed for StaticCatalog {
    fn usable_sites(&self) -> Result<BTreeSet<String>> {
        let sites = self.sites.read().unwrap_or_else(|e| e.into_inner());
        Ok(sites.iter().filter(|(_, usable)| **usable).map(|(n, _)| n.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CATALOG: &str = r#"
sites:
  - { name: T1_US_FNAL, usable: true }
  - { name: T2_CH_CERN, usable: false }
blocks:
  - name: "/A/B/RAW#1"
    dataset: /A/B/RAW
    num_events: 1000
    num_files: 4
    locations: [T1_US_FNAL]
  - name: "/C/D/RAW#1"
    dataset: /C/D/RAW
    open: true
"#;

    #[test]
    fn loads_yaml_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = StaticCatalog::load(&path).unwrap();

        let blocks = catalog.list_blocks("/A/B/RAW").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].num_files, 4);
        assert!(catalog.block_locations("/A/B/RAW#1").unwrap().contains("T1_US_FNAL"));
        assert!(catalog.block_is_open("/C/D/RAW#1").unwrap());
        assert!(catalog.block_is_open("/missing#1").is_err());

        let usable = catalog.usable_sites().unwrap();
        assert_eq!(usable.into_iter().collect::<Vec<_>>(), vec!["T1_US_FNAL".to_string()]);
    }
}
