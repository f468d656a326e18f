use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};
use wq_catalog::{BlockCatalog, CachedSiteFeed, CatalogFile, StaticCatalog};
use wq_core::{now_unix, ElementId, ElementStatus, WorkQueueElement};
use wq_queue::{HttpParentQueue, InMemoryExecution, Poller, Synchronizer, TickReport};
use wq_sites::Resolution;
use wq_spec::{load_spec, FsSpecSource};
use wq_storage::ElementStore;
use wq_storage_sqlite::SqliteStore;

use crate::{Config, ExecutionKind};

/// One configured queue: its store, catalog handles and poller.
pub struct Runner {
    pub root: PathBuf,
    pub cfg: Config,
    pub store: Arc<SqliteStore>,
    pub specs: Arc<FsSpecSource>,
    /// Present only on a leaf queue that runs its own work.
    pub execution: Option<Arc<InMemoryExecution>>,
    poller: Poller,
}

impl Runner {
    pub fn open(root: PathBuf) -> Result<Self> {
        let cfg_path = Config::config_path(&root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let name = queue_name(&root);
            let cfg = Config::default_for_repo(&name);
            cfg.save_to(&cfg_path)?;
            cfg
        };

        let db_path = cfg.db_path(&root);
        let store = Arc::new(SqliteStore::open(&db_path).with_context(|| format!("open {}", db_path.display()))?);

        let catalog_path = cfg.catalog_path(&root);
        let catalog = if catalog_path.exists() {
            Arc::new(StaticCatalog::load(&catalog_path)?)
        } else {
            warn!(path = %catalog_path.display(), "catalog file missing, starting with an empty catalog");
            Arc::new(StaticCatalog::new())
        };
        let blocks = Arc::new(BlockCatalog::new(catalog.clone(), cfg.catalog.block_ttl_secs));
        let sites = Arc::new(CachedSiteFeed::new(catalog, cfg.catalog.site_ttl_secs));
        let specs = Arc::new(FsSpecSource::new(cfg.specs_dir(&root)));

        let sync = Synchronizer::new(store.clone(), specs.clone(), blocks, sites, cfg.sync_settings());
        let execution = match cfg.execution_backend() {
            ExecutionKind::InMemory => {
                let last = sync.last_subscription_id()?;
                Some(Arc::new(InMemoryExecution::starting_after(last)))
            }
            ExecutionKind::None => {
                info!(queue = %cfg.queue.name, root = cfg.is_root(), "no local execution, work stays available");
                None
            }
        };
        let mut poller = Poller::new(sync, cfg.poller_settings());
        if let Some(exec) = &execution {
            poller = poller.with_execution(exec.clone());
        }
        if let Some(url) = &cfg.parent.url {
            let parent = HttpParentQueue::with_timeout(url, cfg.parent_timeout())?;
            poller = poller.with_parent(Box::new(parent));
        }
        info!(
            queue = %cfg.queue.name,
            db = %db_path.display(),
            parent = cfg.parent.url.as_deref().unwrap_or("-"),
            "queue opened"
        );

        Ok(Self {
            root,
            cfg,
            store,
            specs,
            execution,
            poller,
        })
    }

    pub fn init_repo(root: &Path) -> Result<()> {
        let cfg_path = Config::config_path(root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo(&queue_name(root));
            cfg.save_to(&cfg_path)?;
            cfg
        };
        let specs_dir = cfg.specs_dir(root);
        std::fs::create_dir_all(&specs_dir).with_context(|| format!("create {}", specs_dir.display()))?;
        let catalog_path = cfg.catalog_path(root);
        if !catalog_path.exists() {
            let yaml = serde_yaml::to_string(&CatalogFile::default()).context("serialize catalog")?;
            std::fs::write(&catalog_path, yaml).with_context(|| format!("write {}", catalog_path.display()))?;
        }
        // create db
        let _ = SqliteStore::open(&cfg.db_path(root))?;
        Ok(())
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        self.poller.synchronizer()
    }

    pub fn status_counts(&self) -> Result<BTreeMap<ElementStatus, u64>> {
        Ok(self.synchronizer().status_counts()?)
    }

    /// Elements in `status`, or every element when `None`.
    pub fn list(&self, status: Option<ElementStatus>) -> Result<Vec<WorkQueueElement>> {
        let statuses = match status {
            Some(s) => vec![s],
            None => ElementStatus::ALL.to_vec(),
        };
        let mut out = vec![];
        for s in statuses {
            out.extend(self.store.get_by_status(s, None, None)?);
        }
        Ok(out)
    }

    pub fn cancel(&self, ids: &[String]) -> Result<Vec<ElementId>> {
        let ids: Vec<ElementId> = ids.iter().map(ElementId::from_str).collect();
        Ok(self.synchronizer().cancel(&ids)?)
    }

    pub fn revalidate(&self, id: &str) -> Result<Resolution> {
        Ok(self.synchronizer().revalidate_sites(&ElementId::from_str(id))?)
    }

    /// Elements stuck in `status` longer than `interval_secs`, defaulting to the
    /// configured expiry interval.
    pub fn expired(&self, status: ElementStatus, interval_secs: Option<i64>) -> Result<Vec<WorkQueueElement>> {
        let interval = interval_secs
            .or(self.cfg.poller.expiry_interval_secs)
            .ok_or_else(|| anyhow!("no expiry interval given or configured"))?;
        Ok(self.synchronizer().get_expired_elements(status, interval, now_unix())?)
    }

    pub fn fail_orphans(&self) -> Result<usize> {
        Ok(self.synchronizer().fail_orphan_files()?)
    }

    /// Install the spec at `path` and split it into elements of this queue.
    pub fn queue_work(&self, path: &Path) -> Result<Vec<WorkQueueElement>> {
        let mut spec = load_spec(path)?;
        if spec.policy.slice_size.is_none() {
            spec.policy.slice_size = Some(self.cfg.policy.slice_size);
        }
        let installed = self.specs.install(&spec)?;
        info!(spec = %spec.name, path = %installed.display(), "spec installed");
        Ok(self.synchronizer().queue_work(&spec)?)
    }

    pub fn poll_once(&self) -> TickReport {
        self.poller.tick(now_unix())
    }

    pub fn run(&self, shutdown: &AtomicBool) {
        self.poller.run(Duration::from_secs(self.cfg.poller.interval_secs.max(1)), shutdown);
    }
}

fn queue_name(root: &Path) -> String {
    root.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("workqueue")
        .to_string()
}
