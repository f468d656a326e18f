use std::sync::Arc;

use wq_core::{select_within_budget, ElementId, ElementStatus, Progress, ProgressUpdate, WorkQueueElement};
use wq_storage::ElementStore;

use crate::parent::{ParentQueue, ParentResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueIndex(pub usize);

pub struct QueueNode {
    pub name: String,
    pub url: String,
    pub store: Arc<dyn ElementStore>,
    pub parent: Option<QueueIndex>,
}

/// A hierarchy of queues living in one process, parents referenced by index.
#[derive(Default)]
pub struct QueueArena {
    nodes: Vec<QueueNode>,
}

impl QueueArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: &str, url: &str, store: Arc<dyn ElementStore>) -> QueueIndex {
        self.push(name, url, store, None)
    }

    pub fn add_child(&mut self, parent: QueueIndex, name: &str, url: &str, store: Arc<dyn ElementStore>) -> QueueIndex {
        self.push(name, url, store, Some(parent))
    }

    fn push(&mut self, name: &str, url: &str, store: Arc<dyn ElementStore>, parent: Option<QueueIndex>) -> QueueIndex {
        self.nodes.push(QueueNode {
            name: name.to_string(),
            url: url.to_string(),
            store,
            parent,
        });
        QueueIndex(self.nodes.len() - 1)
    }

    pub fn node(&self, idx: QueueIndex) -> Option<&QueueNode> {
        self.nodes.get(idx.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children_of(&self, idx: QueueIndex) -> Vec<QueueIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == Some(idx))
            .map(|(i, _)| QueueIndex(i))
            .collect()
    }

    /// The parent of `idx` as a [`ParentQueue`], or `None` for a root.
    pub fn parent_queue(&self, idx: QueueIndex) -> Option<StoreParentQueue> {
        let parent = self.node(idx)?.parent?;
        let node = self.node(parent)?;
        Some(StoreParentQueue::new(&node.url, node.store.clone()))
    }
}

/// [`ParentQueue`] backed directly by the parent's element store.
#[derive(Clone)]
pub struct StoreParentQueue {
    url: String,
    store: Arc<dyn ElementStore>,
}

impl StoreParentQueue {
    pub fn new(url: &str, store: Arc<dyn ElementStore>) -> Self {
        Self {
            url: url.to_string(),
            store,
        }
    }
}

impl ParentQueue for StoreParentQueue {
    fn location(&self) -> &str {
        &self.url
    }

    fn available_work(&self, max_jobs: u64) -> ParentResult<Vec<WorkQueueElement>> {
        let available = self.store.get_by_status(ElementStatus::Available, None, None)?;
        Ok(select_within_budget(available, max_jobs))
    }

    fn get_element(&self, id: &ElementId) -> ParentResult<Option<WorkQueueElement>> {
        Ok(self.store.get(id)?)
    }

    fn update_status(&self, id: &ElementId, status: ElementStatus, child_queue_url: Option<&str>) -> ParentResult<()> {
        self.store.update_status(std::slice::from_ref(id), status, child_queue_url)?;
        Ok(())
    }

    fn update_progress(&self, id: &ElementId, progress: &Progress) -> ParentResult<()> {
        self.store
            .update_progress(std::slice::from_ref(id), &ProgressUpdate::from(*progress))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wq_core::NewElement;
    use wq_storage::InMemoryStore;

    #[test]
    fn parent_lookup_follows_indices() {
        let mut arena = QueueArena::new();
        let global = arena.add_root("global", "http://global/wq", Arc::new(InMemoryStore::new()));
        let local = arena.add_child(global, "local", "http://local/wq", Arc::new(InMemoryStore::new()));
        assert!(arena.parent_queue(global).is_none());
        assert_eq!(arena.parent_queue(local).unwrap().location(), "http://global/wq");
        assert_eq!(arena.children_of(global), vec![local]);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn store_parent_respects_budget() {
        let store = Arc::new(InMemoryStore::new());
        for (item, jobs) in [("a", 100), ("b", 100), ("c", 500)] {
            store
                .create(NewElement::new("S", "/S/T").with_data_item(item).with_jobs(jobs))
                .unwrap();
        }
        let parent = StoreParentQueue::new("http://global/wq", store);
        let work = parent.available_work(250).unwrap();
        assert_eq!(work.len(), 2);
        assert!(work.iter().all(|e| e.num_jobs == 100));
    }
}
