use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*, progress::*, StoreError};

/// Event range of a Monte Carlo slice.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMask {
    pub first_event: u64,
    pub last_event: u64,
}

impl EventMask {
    pub fn num_events(&self) -> u64 {
        self.last_event.saturating_sub(self.first_event) + 1
    }

    pub fn label(&self) -> String {
        format!("events:{}-{}", self.first_event, self.last_event)
    }
}

/// A unit of schedulable work tracked by a queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkQueueElement {
    pub id: ElementId,
    #[serde(default)]
    pub parent_queue_id: Option<ElementId>,
    #[serde(default)]
    pub subscription_id: Option<i64>,

    pub spec_ref: String,
    pub task: String,
    #[serde(default)]
    pub data_item: Option<String>,
    #[serde(default)]
    pub input_blocks: Vec<String>,
    #[serde(default)]
    pub mask: Option<EventMask>,
    pub num_jobs: u32,

    pub priority: i32,
    pub insert_time: i64,
    pub update_time: i64,
    #[serde(default)]
    pub parent_flag: bool,

    #[serde(default)]
    pub progress: Progress,
    pub status: ElementStatus,

    /// site -> true for a white-list entry, false for a black-list entry.
    #[serde(default)]
    pub sites: BTreeMap<String, bool>,
    #[serde(default)]
    pub resolved_sites: BTreeSet<String>,
    #[serde(default)]
    pub child_queue_url: Option<String>,

    /// Bumped on every status or progress change.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub reported_version: u64,
}

impl WorkQueueElement {
    /// Materialize a candidate as a freshly stored `Available` element.
    pub fn from_new(new: NewElement, id: ElementId, now_unix: i64) -> Self {
        Self {
            id,
            parent_queue_id: new.parent_queue_id,
            subscription_id: None,
            spec_ref: new.spec_ref,
            task: new.task,
            data_item: new.data_item,
            input_blocks: new.input_blocks,
            mask: new.mask,
            num_jobs: new.num_jobs,
            priority: new.priority,
            insert_time: now_unix,
            update_time: now_unix,
            parent_flag: new.parent_flag,
            progress: Progress::default(),
            status: ElementStatus::Available,
            sites: new.sites,
            resolved_sites: BTreeSet::new(),
            child_queue_url: None,
            version: 0,
            reported_version: 0,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.spec_ref, &self.task, self.data_item.as_deref())
    }

    pub fn white_list(&self) -> BTreeSet<String> {
        self.sites.iter().filter(|(_, valid)| **valid).map(|(s, _)| s.clone()).collect()
    }

    pub fn black_list(&self) -> BTreeSet<String> {
        self.sites.iter().filter(|(_, valid)| !**valid).map(|(s, _)| s.clone()).collect()
    }

    pub fn needs_report(&self) -> bool {
        self.version > self.reported_version
    }

    /// A dataset-level element that a local queue splits into block-level work.
    pub fn is_aggregate(&self) -> bool {
        match &self.data_item {
            Some(item) => !item.contains('#') && self.mask.is_none(),
            None => false,
        }
    }
}

/// Identity used for duplicate detection of open elements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub spec_ref: String,
    pub task: String,
    pub data_item: String,
}

impl DedupKey {
    pub fn new(spec_ref: &str, task: &str, data_item: Option<&str>) -> Self {
        Self {
            spec_ref: spec_ref.to_string(),
            task: task.to_string(),
            data_item: data_item.unwrap_or_default().to_string(),
        }
    }
}

/// An element that has not been stored yet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewElement {
    pub spec_ref: String,
    pub task: String,
    pub data_item: Option<String>,
    pub input_blocks: Vec<String>,
    pub mask: Option<EventMask>,
    pub num_jobs: u32,
    pub priority: i32,
    pub parent_queue_id: Option<ElementId>,
    pub parent_flag: bool,
    pub sites: BTreeMap<String, bool>,
}

impl NewElement {
    pub fn new(spec_ref: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            spec_ref: spec_ref.into(),
            task: task.into(),
            data_item: None,
            input_blocks: vec![],
            mask: None,
            num_jobs: 0,
            priority: 0,
            parent_queue_id: None,
            parent_flag: false,
            sites: BTreeMap::new(),
        }
    }

    /// Local copy of an element pulled from a parent queue.
    pub fn from_parent(remote: &WorkQueueElement) -> Self {
        Self {
            spec_ref: remote.spec_ref.clone(),
            task: remote.task.clone(),
            data_item: remote.data_item.clone(),
            input_blocks: remote.input_blocks.clone(),
            mask: remote.mask,
            num_jobs: remote.num_jobs,
            priority: remote.priority,
            parent_queue_id: Some(remote.id.clone()),
            parent_flag: true,
            sites: remote.sites.clone(),
        }
    }

    pub fn with_data_item(mut self, item: impl Into<String>) -> Self {
        self.data_item = Some(item.into());
        self
    }

    pub fn with_jobs(mut self, num_jobs: u32) -> Self {
        self.num_jobs = num_jobs;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_site(mut self, site: impl Into<String>, valid: bool) -> Self {
        self.sites.insert(site.into(), valid);
        self
    }

    pub fn with_parent(mut self, parent_queue_id: ElementId) -> Self {
        self.parent_queue_id = Some(parent_queue_id);
        self.parent_flag = true;
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.spec_ref, &self.task, self.data_item.as_deref())
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.spec_ref.trim().is_empty() || self.task.trim().is_empty() {
            return Err(StoreError::InvalidElement("spec_ref and task are required".into()));
        }
        if self.parent_flag && self.parent_queue_id.is_none() {
            return Err(StoreError::InvalidElement(format!(
                "element for {}/{} is flagged as pulled from a parent but has no parent_queue_id",
                self.spec_ref, self.task
            )));
        }
        Ok(())
    }
}

/// A named dataset block as seen by the data-placement service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub dataset: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub num_events: u64,
    #[serde(default)]
    pub num_files: u64,
    #[serde(default)]
    pub locations: BTreeSet<String>,
    #[serde(default)]
    pub open: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    pub usable: bool,
}

/// One input file of an element in the local execution subsystem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputFile {
    pub lfn: String,
    #[serde(default)]
    pub parents: Vec<String>,
    pub state: FileState,
}

impl InputFile {
    pub fn new(lfn: impl Into<String>) -> Self {
        Self {
            lfn: lfn.into(),
            parents: vec![],
            state: FileState::Available,
        }
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }
}
