use wq_core::{
    ElementId, ElementStatus, EventMask, NewElement, StoreError, WorkQueueElement,
};

#[test]
fn test_new_element_defaults() {
    let e = WorkQueueElement::from_new(NewElement::new("ReReco", "/ReReco/DataProcessing"), ElementId::new(), 100);
    assert_eq!(e.status, ElementStatus::Available);
    assert_eq!(e.insert_time, 100);
    assert_eq!(e.update_time, 100);
    assert_eq!(e.progress.percent_complete, 0);
    assert!(!e.parent_flag);
    assert!(!e.needs_report());
}

#[test]
fn test_element_id_new_is_unique() {
    assert_ne!(ElementId::new(), ElementId::new());
}

#[test]
fn test_parent_flag_requires_parent_id() {
    let mut new = NewElement::new("ReReco", "/ReReco/DataProcessing");
    new.parent_flag = true;
    assert!(matches!(new.validate(), Err(StoreError::InvalidElement(_))));

    let ok = NewElement::new("ReReco", "/ReReco/DataProcessing").with_parent(ElementId::from_str("remote-1"));
    assert!(ok.validate().is_ok());
}

#[test]
fn test_from_parent_keeps_remote_identity() {
    let remote = WorkQueueElement::from_new(
        NewElement::new("ReReco", "/ReReco/DataProcessing")
            .with_data_item("/A/B/RAW")
            .with_jobs(40)
            .with_priority(7)
            .with_site("T1_US_FNAL", true),
        ElementId::from_str("remote-1"),
        5,
    );
    let local = NewElement::from_parent(&remote);
    assert_eq!(local.parent_queue_id, Some(ElementId::from_str("remote-1")));
    assert!(local.parent_flag);
    assert_eq!(local.num_jobs, 40);
    assert_eq!(local.priority, 7);
    assert_eq!(local.sites.get("T1_US_FNAL"), Some(&true));
}

#[test]
fn test_white_and_black_lists_split_site_records() {
    let e = WorkQueueElement::from_new(
        NewElement::new("s", "/s/t").with_site("A", true).with_site("B", false),
        ElementId::new(),
        0,
    );
    assert!(e.white_list().contains("A"));
    assert!(e.black_list().contains("B"));
    assert_eq!(e.white_list().len(), 1);
}

#[test]
fn test_aggregate_detection() {
    let dataset = WorkQueueElement::from_new(NewElement::new("s", "/s/t").with_data_item("/A/B/RAW"), ElementId::new(), 0);
    let block = WorkQueueElement::from_new(NewElement::new("s", "/s/t").with_data_item("/A/B/RAW#1"), ElementId::new(), 0);
    let mut mc = NewElement::new("s", "/s/t");
    let mask = EventMask { first_event: 1, last_event: 100 };
    mc.data_item = Some(mask.label());
    mc.mask = Some(mask);
    let mc = WorkQueueElement::from_new(mc, ElementId::new(), 0);

    assert!(dataset.is_aggregate());
    assert!(!block.is_aggregate());
    assert!(!mc.is_aggregate());
    assert_eq!(mask.num_events(), 100);
}

#[test]
fn test_dedup_key_treats_missing_item_as_empty() {
    let a = NewElement::new("s", "/s/t").dedup_key();
    let b = NewElement::new("s", "/s/t").with_data_item("").dedup_key();
    assert_eq!(a, b);
}
