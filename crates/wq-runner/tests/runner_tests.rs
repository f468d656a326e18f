use std::collections::BTreeSet;
use std::path::Path;

use wq_core::{ElementStatus, NewElement};
use wq_runner::{Config, ExecutionKind, Runner};
use wq_storage::ElementStore;

const CATALOG: &str = r#"
sites:
  - { name: T1_US_FNAL, usable: true }
  - { name: T2_CH_CERN, usable: false }
blocks:
  - name: "/ZeroBias/Run2024B-v1/RAW#a"
    dataset: /ZeroBias/Run2024B-v1/RAW
    num_events: 3000
    num_files: 3
    locations: [T1_US_FNAL]
  - name: "/ZeroBias/Run2024B-v1/RAW#b"
    dataset: /ZeroBias/Run2024B-v1/RAW
    num_events: 1000
    num_files: 1
    locations: [T1_US_FNAL]
  - name: "/ZeroBias/Run2024B-v1/RAW#c"
    dataset: /ZeroBias/Run2024B-v1/RAW
    num_events: 1000
    num_files: 1
    locations: [T2_CH_CERN]
"#;

const SPEC: &str = r#"
name: ZeroBias_Skim
priority: 5
policy: { start: Block }
tasks:
  - name: Skim
    input_dataset: /ZeroBias/Run2024B-v1/RAW
    splitting: { algorithm: EventBased, events_per_job: 1000 }
"#;

fn setup(root: &Path) -> Runner {
    Runner::init_repo(root).unwrap();
    let cfg = Config::load_from(&Config::config_path(root)).unwrap();
    std::fs::write(cfg.catalog_path(root), CATALOG).unwrap();
    Runner::open(root.to_path_buf()).unwrap()
}

#[test]
fn init_creates_config_catalog_and_db() {
    let dir = tempfile::tempdir().unwrap();
    Runner::init_repo(dir.path()).unwrap();
    let cfg = Config::load_from(&Config::config_path(dir.path())).unwrap();
    assert!(cfg.db_path(dir.path()).exists());
    assert!(cfg.catalog_path(dir.path()).exists());
    assert!(cfg.specs_dir(dir.path()).is_dir());

    // second init keeps the existing config
    let mut edited = cfg.clone();
    edited.poller.max_jobs = 7;
    edited.save_to(&Config::config_path(dir.path())).unwrap();
    Runner::init_repo(dir.path()).unwrap();
    let reloaded = Config::load_from(&Config::config_path(dir.path())).unwrap();
    assert_eq!(reloaded.poller.max_jobs, 7);
}

#[test]
fn open_without_init_writes_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Runner::open(dir.path().to_path_buf()).unwrap();
    assert!(Config::config_path(dir.path()).exists());
    assert!(runner.list(None).unwrap().is_empty());
}

#[test]
fn root_queue_poll_leaves_work_for_child_queues() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = dir.path().join("skim.yaml");
    std::fs::write(&spec_path, SPEC).unwrap();
    let runner = setup(dir.path());

    let created = runner.queue_work(&spec_path).unwrap();
    assert_eq!(created.len(), 3);
    assert!(runner.specs.dir.join("ZeroBias_Skim.yaml").exists());

    let counts = runner.status_counts().unwrap();
    assert_eq!(counts[&ElementStatus::Available], 2);
    // the block held only at an unusable site cannot run anywhere
    assert_eq!(counts[&ElementStatus::Failed], 1);

    // a root queue has no execution layer even with the default backend configured
    assert_eq!(runner.cfg.execution.backend, ExecutionKind::InMemory);
    assert!(runner.execution.is_none());
    let report = runner.poll_once();
    assert_eq!(report.injected, 0);
    assert_eq!(report.errors, 0);
    assert_eq!(runner.list(Some(ElementStatus::Available)).unwrap().len(), 2);
    assert!(runner.list(Some(ElementStatus::Acquired)).unwrap().is_empty());

    // queuing again only retries the block that failed
    let again = runner.queue_work(&spec_path).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].status, ElementStatus::Failed);
}

#[test]
fn operator_cancel_and_revalidate() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = dir.path().join("skim.yaml");
    std::fs::write(&spec_path, SPEC).unwrap();
    let runner = setup(dir.path());
    let created = runner.queue_work(&spec_path).unwrap();
    let open: Vec<_> = created.iter().filter(|e| e.status.is_open()).collect();

    let resolution = runner.revalidate(open[0].id.as_str()).unwrap();
    assert!(resolution.valid_sites.contains("T1_US_FNAL"));

    let ids: Vec<String> = created.iter().map(|e| e.id.to_string()).collect();
    let canceled = runner.cancel(&ids).unwrap();
    assert_eq!(canceled.len(), open.len());
    assert!(runner.list(Some(ElementStatus::Available)).unwrap().is_empty());

    assert!(runner.cancel(&["no-such-element".to_string()]).is_err());
}

#[test]
fn expired_needs_an_interval() {
    let dir = tempfile::tempdir().unwrap();
    let runner = setup(dir.path());
    assert!(runner.expired(ElementStatus::Negotiating, None).unwrap().is_empty());

    let mut cfg = runner.cfg.clone();
    cfg.poller.expiry_interval_secs = None;
    cfg.save_to(&Config::config_path(dir.path())).unwrap();
    drop(runner);
    let runner = Runner::open(dir.path().to_path_buf()).unwrap();
    assert!(runner.expired(ElementStatus::Negotiating, None).is_err());
    assert!(runner.expired(ElementStatus::Negotiating, Some(60)).unwrap().is_empty());
}

#[test]
fn leaf_subscription_ids_stay_unique_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    Runner::init_repo(dir.path()).unwrap();
    let cfg_path = Config::config_path(dir.path());
    let mut cfg = Config::load_from(&cfg_path).unwrap();
    cfg.parent.url = Some("http://global.invalid/wq".to_string());
    cfg.save_to(&cfg_path).unwrap();

    let inject = |items: &[&str]| {
        let runner = Runner::open(dir.path().to_path_buf()).unwrap();
        for item in items {
            runner
                .store
                .create(NewElement::new("Leaf", "/Leaf/Proc").with_data_item(*item).with_jobs(1))
                .unwrap();
        }
        let exec = runner.execution.clone().expect("leaf queue runs its own work");
        assert_eq!(runner.synchronizer().inject_work(exec.as_ref()).unwrap(), items.len());
    };
    inject(&["a", "b"]);
    inject(&["c", "d"]);

    let runner = Runner::open(dir.path().to_path_buf()).unwrap();
    let acquired = runner.list(Some(ElementStatus::Acquired)).unwrap();
    assert_eq!(acquired.len(), 4);
    let subs: BTreeSet<i64> = acquired.iter().filter_map(|e| e.subscription_id).collect();
    assert_eq!(subs.len(), 4, "subscription ids reused: {acquired:?}");
}

#[test]
fn leaf_queue_can_opt_out_of_local_execution() {
    let dir = tempfile::tempdir().unwrap();
    Runner::init_repo(dir.path()).unwrap();
    let cfg_path = Config::config_path(dir.path());
    let mut cfg = Config::load_from(&cfg_path).unwrap();
    cfg.parent.url = Some("http://global.invalid/wq".to_string());
    cfg.execution.backend = ExecutionKind::None;
    cfg.save_to(&cfg_path).unwrap();

    let runner = Runner::open(dir.path().to_path_buf()).unwrap();
    assert!(runner.execution.is_none());
}
