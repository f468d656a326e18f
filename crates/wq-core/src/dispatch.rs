use std::cmp::Ordering;

use crate::WorkQueueElement;

/// Higher priority first; among equals the element waiting longest wins.
pub fn dispatch_order(a: &WorkQueueElement, b: &WorkQueueElement) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.insert_time.cmp(&b.insert_time))
        .then(a.update_time.cmp(&b.update_time))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_dispatch(elements: &mut [WorkQueueElement]) {
    elements.sort_by(dispatch_order);
}

/// Greedy pick in dispatch order that keeps the summed `num_jobs` within `max_jobs`.
/// Elements that do not fit are skipped so that smaller ones further down still can.
pub fn select_within_budget(mut elements: Vec<WorkQueueElement>, max_jobs: u64) -> Vec<WorkQueueElement> {
    sort_for_dispatch(&mut elements);
    let mut remaining = max_jobs;
    let mut picked = Vec::new();
    for e in elements {
        let jobs = u64::from(e.num_jobs);
        if jobs > remaining {
            continue;
        }
        remaining -= jobs;
        picked.push(e);
    }
    picked
}
