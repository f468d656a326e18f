use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, warn};
use wq_core::{now_unix, Block};

use crate::{DataLocationService, SiteStatusFeed};

struct Entry<T> {
    fetched_at: i64,
    value: T,
}

/// Time-bounded cache of dataset block listings.
///
/// A refresh failure falls back to the last good listing when there is one.
pub struct BlockCatalog {
    inner: Arc<dyn DataLocationService>,
    ttl_secs: i64,
    datasets: Mutex<HashMap<String, Entry<Vec<Block>>>>,
}

impl BlockCatalog {
    pub fn new(inner: Arc<dyn DataLocationService>, ttl_secs: i64) -> Self {
        Self {
            inner,
            ttl_secs,
            datasets: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached listing so the next read goes to the service.
    pub fn invalidate(&self) {
        self.datasets.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn fresh(&self, dataset: &str, now: i64) -> Option<Vec<Block>> {
        let datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        datasets
            .get(dataset)
            .filter(|e| now - e.fetched_at < self.ttl_secs)
            .map(|e| e.value.clone())
    }

    fn stale(&self, dataset: &str) -> Option<Vec<Block>> {
        let datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
        datasets.get(dataset).map(|e| e.value.clone())
    }
}

impl DataLocationService for BlockCatalog {
    fn list_blocks(&self, dataset: &str) -> Result<Vec<Block>> {
        let now = now_unix();
        if let Some(blocks) = self.fresh(dataset, now) {
            return Ok(blocks);
        }
        // Network call happens with the cache lock released.
        match self.inner.list_blocks(dataset) {
            Ok(blocks) => {
                debug!(dataset, blocks = blocks.len(), "refreshed block listing");
                let mut datasets = self.datasets.lock().unwrap_or_else(|e| e.into_inner());
                datasets.insert(
                    dataset.to_string(),
                    Entry {
                        fetched_at: now,
                        value: blocks.clone(),
                    },
                );
                Ok(blocks)
            }
            Err(err) => match self.stale(dataset) {
                Some(blocks) => {
                    warn!(dataset, error = %err, "catalog refresh failed; using stale listing");
                    Ok(blocks)
                }
                None => Err(err),
            },
        }
    }

    fn block(&self, name: &str) -> Result<Option<Block>> {
        self.inner.block(name)
    }
}

/// Time-bounded cache of the usable-site set.
pub struct CachedSiteFeed {
    inner: Arc<dyn SiteStatusFeed>,
    ttl_secs: i64,
    cached: Mutex<Option<Entry<BTreeSet<String>>>>,
}

impl CachedSiteFeed {
    pub fn new(inner: Arc<dyn SiteStatusFeed>, ttl_secs: i64) -> Self {
        Self {
            inner,
            ttl_secs,
            cached: Mutex::new(None),
        }
    }
}

impl SiteStatusFeed for CachedSiteFeed {
    fn usable_sites(&self) -> Result<BTreeSet<String>> {
        let now = now_unix();
        {
            let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cached.as_ref().filter(|e| now - e.fetched_at < self.ttl_secs) {
                return Ok(entry.value.clone());
            }
        }
        match self.inner.usable_sites() {
            Ok(sites) => {
                let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
                *cached = Some(Entry {
                    fetched_at: now,
                    value: sites.clone(),
                });
                Ok(sites)
            }
            Err(err) => {
                let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
                match cached.as_ref() {
                    Some(entry) => {
                        warn!(error = %err, "site status refresh failed; using stale site list");
                        Ok(entry.value.clone())
                    }
                    None => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticCatalog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
        catalog: StaticCatalog,
    }

    impl DataLocationService for Counting {
        fn list_blocks(&self, dataset: &str) -> Result<Vec<Block>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("catalog timeout");
            }
            self.catalog.list_blocks(dataset)
        }
        fn block(&self, name: &str) -> Result<Option<Block>> {
            self.catalog.block(name)
        }
    }

    fn block() -> Block {
        Block {
            name: "/A/B/RAW#1".into(),
            dataset: "/A/B/RAW".into(),
            size: 10,
            num_events: 10,
            num_files: 1,
            locations: BTreeSet::from(["T1".to_string()]),
            open: false,
        }
    }

    #[test]
    fn listing_is_cached_within_ttl() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
            catalog: StaticCatalog::new(),
        });
        inner.catalog.add_block(block());
        let cache = BlockCatalog::new(inner.clone(), 3600);

        assert_eq!(cache.list_blocks("/A/B/RAW").unwrap().len(), 1);
        assert_eq!(cache.list_blocks("/A/B/RAW").unwrap().len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cache.list_blocks("/A/B/RAW").unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_without_cached_listing_propagates() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
            catalog: StaticCatalog::new(),
        });
        let cache = BlockCatalog::new(inner, 0);
        assert!(cache.list_blocks("/A/B/RAW").is_err());
    }

    #[test]
    fn site_feed_caches() {
        let catalog = Arc::new(StaticCatalog::new());
        catalog.set_site("T1", true);
        let feed = CachedSiteFeed::new(catalog.clone(), 3600);
        assert!(feed.usable_sites().unwrap().contains("T1"));
        catalog.set_site("T1", false);
        assert!(feed.usable_sites().unwrap().contains("T1"));
    }
}
