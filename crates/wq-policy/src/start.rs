use std::collections::HashSet;

use wq_catalog::DataLocationService;
use wq_core::{Block, DedupKey, NewElement, WorkQueueElement};
use wq_spec::{StartPolicyKind, TaskSpec, WmSpec};

use crate::PolicyError;

/// Everything a start policy looks at.
pub struct SplitInput<'a> {
    pub spec: &'a WmSpec,
    pub task: &'a TaskSpec,
    pub catalog: &'a dyn DataLocationService,
    /// Elements already stored for this spec and task.
    pub existing: &'a [WorkQueueElement],
    /// Set when a pulled aggregate element is being split into local work.
    pub parent: Option<&'a WorkQueueElement>,
}

impl<'a> SplitInput<'a> {
    pub fn task_path(&self) -> String {
        self.spec.task_path(self.task)
    }

    pub fn no_work(&self, reason: impl Into<String>) -> PolicyError {
        PolicyError::NoWork {
            spec: self.spec.name.clone(),
            task: self.task_path(),
            reason: reason.into(),
        }
    }

    pub fn bad_spec(&self, reason: impl Into<String>) -> PolicyError {
        PolicyError::WmSpec {
            spec: self.spec.name.clone(),
            reason: reason.into(),
        }
    }

    /// Skeleton element carrying spec identity, priority, site lists and parentage.
    pub fn base_element(&self) -> NewElement {
        let mut e = NewElement::new(self.spec.name.clone(), self.task_path()).with_priority(self.spec.priority);
        for site in &self.task.site_whitelist {
            e.sites.insert(site.clone(), true);
        }
        for site in &self.task.site_blacklist {
            e.sites.insert(site.clone(), false);
        }
        if let Some(parent) = self.parent {
            e.priority = parent.priority;
            for (site, valid) in &parent.sites {
                // a black record from either side stays black
                let merged = e.sites.get(site).copied().unwrap_or(true) && *valid;
                e.sites.insert(site.clone(), merged);
            }
            e = e.with_parent(parent.id.clone());
        }
        e
    }

    pub fn input_dataset(&self) -> Result<&'a str, PolicyError> {
        self.task
            .input_dataset
            .as_deref()
            .ok_or_else(|| self.bad_spec(format!("task {} has no input_dataset", self.task.name)))
    }

    /// Blocks of the input dataset after block white/black lists, the parent's
    /// block restriction, and dropping blocks with no files.
    pub fn usable_blocks(&self) -> Result<Vec<Block>, PolicyError> {
        let dataset = self.input_dataset()?;
        let blocks = self.catalog.list_blocks(dataset).map_err(PolicyError::Catalog)?;
        let restricted: Option<HashSet<&str>> = self
            .parent
            .filter(|p| !p.input_blocks.is_empty())
            .map(|p| p.input_blocks.iter().map(String::as_str).collect());

        let usable: Vec<Block> = blocks
            .into_iter()
            .filter(|b| self.task.block_whitelist.is_empty() || self.task.block_whitelist.contains(&b.name))
            .filter(|b| !self.task.block_blacklist.contains(&b.name))
            .filter(|b| restricted.as_ref().map_or(true, |r| r.contains(b.name.as_str())))
            .filter(|b| b.num_files > 0)
            .collect();
        if usable.is_empty() {
            return Err(self.no_work(format!("dataset {dataset} has no usable blocks")));
        }
        Ok(usable)
    }

    /// Drop candidates that already have an open element, so reruns are idempotent.
    pub fn drop_existing(&self, candidates: Vec<NewElement>) -> Vec<NewElement> {
        let open: HashSet<DedupKey> = self
            .existing
            .iter()
            .filter(|e| e.status.is_open())
            .map(|e| e.dedup_key())
            .collect();
        candidates.into_iter().filter(|c| !open.contains(&c.dedup_key())).collect()
    }
}

/// Turns a task into candidate elements.
pub trait StartPolicy: Send + Sync {
    fn kind(&self) -> StartPolicyKind;

    /// Candidate elements for the task, minus those already open.
    fn split(&self, input: &SplitInput<'_>) -> Result<Vec<NewElement>, PolicyError>;
}
