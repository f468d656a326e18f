use std::collections::BTreeSet;

use wq_catalog::StaticCatalog;
use wq_core::{Block, ElementId, ElementStatus, NewElement, WorkQueueElement};
use wq_policy::{start_policy, PolicyError, SplitInput};
use wq_spec::{parse_spec, StartPolicyKind, WmSpec};

fn catalog() -> StaticCatalog {
    let c = StaticCatalog::new();
    for (i, files) in [(1, 4u64), (2, 2), (3, 0)] {
        c.add_block(Block {
            name: format!("/JetHT/Run2023A-v1/RAW#{i}"),
            dataset: "/JetHT/Run2023A-v1/RAW".into(),
            size: 1_000 * files,
            num_events: 1_000 * files,
            num_files: files,
            locations: BTreeSet::from(["T1_US_FNAL".to_string()]),
            open: false,
        });
    }
    c
}

fn rereco() -> WmSpec {
    parse_spec(
        r#"
name: ReReco
priority: 10
tasks:
  - name: DataProcessing
    input_dataset: /JetHT/Run2023A-v1/RAW
    splitting: { algorithm: EventBased, events_per_job: 1500 }
    site_blacklist: [T2_CH_CERN]
"#,
    )
    .unwrap()
}

fn stored(new: NewElement) -> WorkQueueElement {
    WorkQueueElement::from_new(new, ElementId::new(), 0)
}

#[test]
fn block_policy_splits_per_block_and_skips_empty_blocks() {
    let spec = rereco();
    let catalog = catalog();
    let input = SplitInput {
        spec: &spec,
        task: &spec.tasks[0],
        catalog: &catalog,
        existing: &[],
        parent: None,
    };
    let elements = start_policy(StartPolicyKind::Block).split(&input).unwrap();
    assert_eq!(elements.len(), 2);
    let jobs: Vec<u32> = elements.iter().map(|e| e.num_jobs).collect();
    assert_eq!(jobs, vec![3, 2]);
    assert!(elements.iter().all(|e| e.task == "/ReReco/DataProcessing"));
    assert!(elements.iter().all(|e| e.priority == 10));
    assert!(elements.iter().all(|e| e.sites.get("T2_CH_CERN") == Some(&false)));
}

#[test]
fn rerun_with_open_elements_yields_nothing() {
    let spec = rereco();
    let catalog = catalog();
    let policy = start_policy(StartPolicyKind::Block);
    let first = policy
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap();
    let existing: Vec<WorkQueueElement> = first.into_iter().map(stored).collect();

    let second = policy
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &existing,
            parent: None,
        })
        .unwrap();
    assert!(second.is_empty());
}

#[test]
fn finished_elements_do_not_block_resplitting() {
    let spec = rereco();
    let catalog = catalog();
    let policy = start_policy(StartPolicyKind::Block);
    let input = SplitInput {
        spec: &spec,
        task: &spec.tasks[0],
        catalog: &catalog,
        existing: &[],
        parent: None,
    };
    let mut existing: Vec<WorkQueueElement> = policy.split(&input).unwrap().into_iter().map(stored).collect();
    existing[0].status = ElementStatus::Done;

    let again = policy
        .split(&SplitInput {
            existing: &existing,
            ..input
        })
        .unwrap();
    assert_eq!(again.len(), 1);
}

#[test]
fn unknown_dataset_is_no_work() {
    let mut spec = rereco();
    spec.tasks[0].input_dataset = Some("/Nothing/Here/RAW".into());
    let catalog = catalog();
    let err = start_policy(StartPolicyKind::Block)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap_err();
    assert!(matches!(err, PolicyError::NoWork { .. }));
    assert!(err.is_terminal());
}

#[test]
fn block_policy_without_input_is_a_spec_error() {
    let mut spec = rereco();
    spec.tasks[0].input_dataset = None;
    let catalog = catalog();
    let err = start_policy(StartPolicyKind::Block)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap_err();
    assert!(matches!(err, PolicyError::WmSpec { .. }));
}

#[test]
fn dataset_policy_emits_one_aggregate() {
    let spec = rereco();
    let catalog = catalog();
    let elements = start_policy(StartPolicyKind::Dataset)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap();
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0].data_item.as_deref(), Some("/JetHT/Run2023A-v1/RAW"));
    assert_eq!(elements[0].input_blocks.len(), 2);
    assert_eq!(elements[0].num_jobs, 5);
    assert!(stored(elements[0].clone()).is_aggregate());
}

#[test]
fn expanding_a_pulled_aggregate_inherits_parentage() {
    let spec = rereco();
    let catalog = catalog();
    let mut parent = stored(
        NewElement::new("ReReco", "/ReReco/DataProcessing")
            .with_data_item("/JetHT/Run2023A-v1/RAW")
            .with_priority(99)
            .with_site("T1_US_FNAL", true),
    );
    parent.input_blocks = vec!["/JetHT/Run2023A-v1/RAW#2".into()];

    let children = start_policy(StartPolicyKind::Block)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: Some(&parent),
        })
        .unwrap();
    assert_eq!(children.len(), 1);
    let c = &children[0];
    assert_eq!(c.data_item.as_deref(), Some("/JetHT/Run2023A-v1/RAW#2"));
    assert_eq!(c.parent_queue_id.as_ref(), Some(&parent.id));
    assert!(c.parent_flag);
    assert_eq!(c.priority, 99);
    assert_eq!(c.sites.get("T1_US_FNAL"), Some(&true));
    assert_eq!(c.sites.get("T2_CH_CERN"), Some(&false));
}

#[test]
fn monte_carlo_slices_events() {
    let spec = parse_spec(
        r#"
name: MC
policy: { slice_size: 10 }
tasks:
  - name: Production
    total_events: 2500
    splitting: { algorithm: EventBased, events_per_job: 100 }
"#,
    )
    .unwrap();
    let catalog = StaticCatalog::new();
    let elements = start_policy(StartPolicyKind::MonteCarlo)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap();
    // 1000 events per element
    assert_eq!(elements.len(), 3);
    assert_eq!(elements[0].data_item.as_deref(), Some("events:1-1000"));
    assert_eq!(elements[2].data_item.as_deref(), Some("events:2001-2500"));
    let jobs: Vec<u32> = elements.iter().map(|e| e.num_jobs).collect();
    assert_eq!(jobs, vec![10, 10, 5]);
    assert!(elements.iter().all(|e| e.mask.is_some()));
}

#[test]
fn monte_carlo_slices_reach_the_last_event() {
    let spec = parse_spec(
        r#"
name: MC
policy: { slice_size: 1 }
tasks:
  - name: Production
    total_events: 18446744073709551615
    splitting: { algorithm: EventBased, events_per_job: 9223372036854775808 }
"#,
    )
    .unwrap();
    let catalog = StaticCatalog::new();
    let elements = start_policy(StartPolicyKind::MonteCarlo)
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap();
    assert_eq!(elements.len(), 2);
    let last = elements[1].mask.unwrap();
    assert_eq!(last.first_event, 9_223_372_036_854_775_809);
    assert_eq!(last.last_event, u64::MAX);
}

#[test]
fn single_policy_emits_one_element_once() {
    let spec = rereco();
    let catalog = catalog();
    let policy = start_policy(StartPolicyKind::Single);
    let first = policy
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &[],
            parent: None,
        })
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].num_jobs, 5);
    assert!(first[0].data_item.is_none());

    let existing = vec![stored(first[0].clone())];
    let second = policy
        .split(&SplitInput {
            spec: &spec,
            task: &spec.tasks[0],
            catalog: &catalog,
            existing: &existing,
            parent: None,
        })
        .unwrap();
    assert!(second.is_empty());
}
