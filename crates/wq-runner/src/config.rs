use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use wq_queue::{PollerSettings, SyncSettings, DEFAULT_MAX_JOBS, DEFAULT_TIMEOUT_SECS};
use wq_spec::{EndPolicyKind, StartPolicyKind, DEFAULT_FAILURE_THRESHOLD, DEFAULT_SLICE_SIZE};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub queue: QueueConfig,
    #[serde(default)]
    pub parent: ParentConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    pub name: String,
    /// URL this queue is known by; recorded on parent elements it claims.
    pub url: String,
    pub db: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ParentConfig {
    /// Parent queue base URL. A queue without one is a root queue.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub max_jobs: u64,
    #[serde(default)]
    pub expiry_interval_secs: Option<i64>,
    #[serde(default)]
    pub requeue_expired: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_jobs: DEFAULT_MAX_JOBS,
            expiry_interval_secs: Some(3_600),
            requeue_expired: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// Start policy for specs that do not name one.
    #[serde(default)]
    pub start: Option<StartPolicyKind>,
    /// Policy used to split aggregate work pulled from the parent.
    pub expand: StartPolicyKind,
    #[serde(default)]
    pub end: EndPolicyKind,
    pub failure_threshold: f64,
    /// Default Monte Carlo slice for specs that do not set one.
    pub slice_size: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            start: None,
            expand: StartPolicyKind::Block,
            end: EndPolicyKind::SingleShot,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            slice_size: DEFAULT_SLICE_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    /// Elements stay `Available` for an outside consumer.
    None,
    /// Subscriptions are tracked in process.
    #[default]
    InMemory,
}

/// Local execution layer of a leaf queue. A root queue never injects, whatever
/// this says: its elements are for child queues to pull.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub backend: ExecutionKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// YAML file with sites and dataset blocks.
    pub path: String,
    pub specs_dir: String,
    #[serde(default = "default_block_ttl")]
    pub block_ttl_secs: i64,
    #[serde(default = "default_site_ttl")]
    pub site_ttl_secs: i64,
}

fn default_block_ttl() -> i64 {
    600
}

fn default_site_ttl() -> i64 {
    300
}

impl Config {
    pub fn default_for_repo(queue_name: &str) -> Self {
        Self {
            queue: QueueConfig {
                name: queue_name.to_string(),
                url: format!("http://localhost:8240/{queue_name}"),
                db: ".workqueue/workqueue.db".to_string(),
            },
            parent: ParentConfig::default(),
            poller: PollerConfig::default(),
            policy: PolicyConfig::default(),
            catalog: CatalogConfig {
                path: ".workqueue/catalog.yaml".to_string(),
                specs_dir: ".workqueue/specs".to_string(),
                block_ttl_secs: default_block_ttl(),
                site_ttl_secs: default_site_ttl(),
            },
            execution: ExecutionConfig::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse workqueue.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".workqueue").join("workqueue.toml")
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.queue.db)
    }

    pub fn catalog_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.catalog.path)
    }

    pub fn specs_dir(&self, root: &Path) -> PathBuf {
        resolve(root, &self.catalog.specs_dir)
    }

    pub fn is_root(&self) -> bool {
        self.parent.url.is_none()
    }

    /// Execution backend to attach, if any.
    pub fn execution_backend(&self) -> ExecutionKind {
        if self.is_root() {
            ExecutionKind::None
        } else {
            self.execution.backend
        }
    }

    pub fn parent_timeout(&self) -> Duration {
        Duration::from_secs(self.parent.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            queue_url: self.queue.url.clone(),
            start_policy: self.policy.start,
            expand_policy: self.policy.expand,
            end_policy: self.policy.end,
            failure_threshold: self.policy.failure_threshold,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            max_jobs: self.poller.max_jobs,
            expiry_interval: self.poller.expiry_interval_secs,
            requeue_expired: self.poller.requeue_expired,
        }
    }
}

/// Expand `~` and anchor relative paths at `root`.
fn resolve(root: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = Config::config_path(dir.path());
        let cfg = Config::default_for_repo("agent-1");
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[queue]
name = "global"
url = "http://global:8240/global"
db = "/var/lib/workqueue/global.db"

[catalog]
path = "catalog.yaml"
specs_dir = "specs"
"#,
        )
        .unwrap();
        assert_eq!(cfg.parent.url, None);
        assert_eq!(cfg.poller, PollerConfig::default());
        assert_eq!(cfg.policy.expand, StartPolicyKind::Block);
        assert_eq!(cfg.catalog.block_ttl_secs, 600);
        assert_eq!(cfg.execution.backend, ExecutionKind::InMemory);
        // no parent, so nothing is injected locally
        assert_eq!(cfg.execution_backend(), ExecutionKind::None);
        assert_eq!(cfg.db_path(Path::new("/srv")), PathBuf::from("/var/lib/workqueue/global.db"));
        assert_eq!(cfg.catalog_path(Path::new("/srv")), PathBuf::from("/srv/catalog.yaml"));
    }

    #[test]
    fn policy_kinds_parse_by_name() {
        let cfg: PolicyConfig = toml::from_str(
            r#"
start = "MonteCarlo"
expand = "Block"
end = "SingleShot"
failure_threshold = 0.25
slice_size = 200
"#,
        )
        .unwrap();
        assert_eq!(cfg.start, Some(StartPolicyKind::MonteCarlo));
        let sync = Config {
            policy: cfg,
            ..Config::default_for_repo("q")
        }
        .sync_settings();
        assert_eq!(sync.failure_threshold, 0.25);
        assert_eq!(sync.start_policy, Some(StartPolicyKind::MonteCarlo));
    }

    #[test]
    fn leaf_queue_picks_its_execution_backend() {
        let mut cfg: Config = toml::from_str(
            r#"
[queue]
name = "agent-1"
url = "http://agent-1:8240/agent-1"
db = "wq.db"

[parent]
url = "http://global:8240/global"

[catalog]
path = "catalog.yaml"
specs_dir = "specs"

[execution]
backend = "none"
"#,
        )
        .unwrap();
        assert_eq!(cfg.execution_backend(), ExecutionKind::None);
        cfg.execution.backend = ExecutionKind::InMemory;
        assert_eq!(cfg.execution_backend(), ExecutionKind::InMemory);
        assert!(toml::to_string(&cfg).unwrap().contains("backend = \"in-memory\""));
    }

    #[test]
    fn bad_toml_reports_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workqueue.toml");
        std::fs::write(&path, "[queue\nname=").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("workqueue.toml"));
    }
}
