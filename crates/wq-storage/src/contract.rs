use anyhow::{anyhow, ensure, Result};
use wq_core::{
    Clock, ElementId, ElementStatus, FileState, InputFile, ManualClock, NewElement, ProgressUpdate, StoreError,
};

use crate::traits::ElementStore;

/// Shared store contract suite, run against every `ElementStore` implementation.
///
/// `clock` must be the clock the store stamps times with; the suite advances it to
/// exercise the time-window filters. The store must start empty.
pub fn run_store_contract_suite(store: &dyn ElementStore, clock: &ManualClock) -> Result<()> {
    creation_and_lookup(store)?;
    duplicates(store)?;
    transitions(store)?;
    progress(store)?;
    windows(store, clock)?;
    sites_and_subscription(store)?;
    files(store)?;
    status_counts(store)?;
    injection(store)?;
    unreported(store)?;
    Ok(())
}

fn creation_and_lookup(store: &dyn ElementStore) -> Result<()> {
    let before = store.count_by_status(ElementStatus::Available, None, None)?;
    let e = store.create(NewElement::new("ReReco", "/ReReco/Proc").with_data_item("/A/B/RAW#1").with_jobs(4))?;
    ensure!(e.status == ElementStatus::Available, "new element must be Available");
    ensure!(
        store.count_by_status(ElementStatus::Available, None, None)? == before + 1,
        "count_by_status must grow by exactly one"
    );
    let got = store.get(&e.id)?.ok_or_else(|| anyhow!("created element not found"))?;
    ensure!(got == e, "stored element must round-trip unchanged");
    ensure!(
        store.get_by_spec("ReReco", "/ReReco/Proc")?.iter().any(|x| x.id == e.id),
        "get_by_spec must find the element"
    );

    let child = store.create(
        NewElement::new("ReReco", "/ReReco/Proc")
            .with_data_item("/A/B/RAW#1-child")
            .with_parent(e.id.clone()),
    )?;
    let children = store.get_by_parent(&e.id)?;
    ensure!(children.len() == 1 && children[0].id == child.id, "get_by_parent must return the child");
    ensure!(store.create(NewElement::new("", "")).is_err(), "empty spec must be rejected");
    Ok(())
}

fn duplicates(store: &dyn ElementStore) -> Result<()> {
    let first = store.create(NewElement::new("Dup", "/Dup/T").with_data_item("blk#1"))?;
    match store.create(NewElement::new("Dup", "/Dup/T").with_data_item("blk#1")) {
        Err(StoreError::DuplicateElement { .. }) => {}
        other => return Err(anyhow!("expected DuplicateElement, got {other:?}")),
    }

    // a finished element no longer blocks its key
    store.update_status(&[first.id.clone()], ElementStatus::Canceled, None)?;
    store.create(NewElement::new("Dup", "/Dup/T").with_data_item("blk#1"))?;
    Ok(())
}

fn transitions(store: &dyn ElementStore) -> Result<()> {
    let a = store.create(NewElement::new("Tr", "/Tr/T").with_data_item("a"))?;
    let b = store.create(NewElement::new("Tr", "/Tr/T").with_data_item("b"))?;

    match store.update_status(&[a.id.clone()], ElementStatus::Done, None) {
        Err(StoreError::InvalidTransition { from, to, .. }) => {
            ensure!(from == ElementStatus::Available && to == ElementStatus::Done, "wrong transition reported");
        }
        other => return Err(anyhow!("expected InvalidTransition, got {other:?}")),
    }
    ensure!(status_of(store, &a.id)? == ElementStatus::Available, "illegal transition must not change status");

    // a batch with one bad id changes nothing
    store.update_status(&[b.id.clone()], ElementStatus::Negotiating, None)?;
    store.update_status(&[b.id.clone()], ElementStatus::Acquired, None)?;
    ensure!(
        store.update_status(&[a.id.clone(), b.id.clone()], ElementStatus::Negotiating, None).is_err(),
        "batch containing an illegal move must fail"
    );
    ensure!(status_of(store, &a.id)? == ElementStatus::Available, "batch failure must not move other ids");

    store.update_status(&[a.id.clone()], ElementStatus::Negotiating, Some("http://child/wq"))?;
    let a2 = store.get(&a.id)?.ok_or_else(|| anyhow!("missing"))?;
    ensure!(a2.child_queue_url.as_deref() == Some("http://child/wq"), "child queue url must be recorded");
    ensure!(a2.version > a.version, "status change must bump version");

    ensure!(
        matches!(
            store.update_status(&[ElementId::from_str("missing")], ElementStatus::Canceled, None),
            Err(StoreError::ElementNotFound(_))
        ),
        "unknown id must be reported"
    );
    store.update_status(&[], ElementStatus::Canceled, None)?;
    Ok(())
}

fn progress(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Pr", "/Pr/T").with_data_item("x"))?;
    store.update_progress(
        &[e.id.clone()],
        &ProgressUpdate {
            percent_complete: Some(40),
            percent_success: Some(90),
            files_processed: Some(3),
        },
    )?;
    let p = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?.progress;
    ensure!(p.percent_complete == 40, "complete must be stored");
    ensure!(p.percent_success <= p.percent_complete, "success must not exceed complete");

    store.update_progress(
        &[e.id.clone()],
        &ProgressUpdate {
            percent_complete: Some(10),
            ..Default::default()
        },
    )?;
    let p2 = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?.progress;
    ensure!(p2.percent_complete == 40, "progress must never go backwards");

    store.update_progress(&[], &ProgressUpdate::default())?;

    store.update_status(&[e.id.clone()], ElementStatus::Canceled, None)?;
    store.update_progress(
        &[e.id.clone()],
        &ProgressUpdate {
            percent_complete: Some(99),
            ..Default::default()
        },
    )?;
    let p3 = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?.progress;
    ensure!(p3.percent_complete == 40, "terminal elements keep their progress");
    Ok(())
}

fn windows(store: &dyn ElementStore, clock: &ManualClock) -> Result<()> {
    let t0 = clock.now();
    let old = store.create(NewElement::new("Win", "/Win/T").with_data_item("old"))?;
    store.update_status(&[old.id.clone()], ElementStatus::Negotiating, None)?;
    clock.advance(100);
    let fresh = store.create(NewElement::new("Win", "/Win/T").with_data_item("fresh"))?;
    store.update_status(&[fresh.id.clone()], ElementStatus::Negotiating, None)?;

    let stale = store.get_by_status(ElementStatus::Negotiating, None, Some(t0 + 50))?;
    ensure!(stale.iter().any(|e| e.id == old.id), "old element must be before the cutoff");
    ensure!(!stale.iter().any(|e| e.id == fresh.id), "fresh element must be after the cutoff");

    let recent = store.get_by_status(ElementStatus::Negotiating, Some(t0 + 50), None)?;
    ensure!(recent.iter().any(|e| e.id == fresh.id), "since must include the fresh element");
    ensure!(!recent.iter().any(|e| e.id == old.id), "since must exclude the old element");
    ensure!(
        store.count_by_status(ElementStatus::Negotiating, Some(t0 + 50), None)? as usize == recent.len(),
        "count and get must agree"
    );
    Ok(())
}

fn sites_and_subscription(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Site", "/Site/T").with_data_item("s").with_site("T1_A", true))?;
    let mut sites = e.sites.clone();
    sites.insert("T2_B".into(), false);
    store.set_sites(&e.id, &sites)?;
    store.set_resolved_sites(&e.id, &["T1_A".to_string()].into_iter().collect())?;
    let got = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?;
    ensure!(got.sites == sites, "site records must be replaced");
    ensure!(got.white_list().len() == 1 && got.black_list().len() == 1, "white/black split");
    ensure!(got.resolved_sites.contains("T1_A"), "resolved sites must be stored");

    store.set_subscription(&e.id, 7)?;
    store.set_subscription(&e.id, 7)?;
    ensure!(store.set_subscription(&e.id, 8).is_err(), "subscription link is set once");
    ensure!(
        store.get(&e.id)?.and_then(|x| x.subscription_id) == Some(7),
        "first subscription must stick"
    );

    store.update_status(&[e.id.clone()], ElementStatus::Negotiating, None)?;
    let v = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?.version;
    store.mark_reported(&e.id, v)?;
    ensure!(
        !store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?.needs_report(),
        "reported element must not need a report"
    );
    Ok(())
}

fn files(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Files", "/Files/T").with_data_item("f"))?;
    ensure!(store.input_files(&e.id)?.is_empty(), "new element has no files");
    store.add_input_files(
        &e.id,
        &[
            InputFile::new("/store/a.root").with_parents(&["/store/p1.root"]),
            InputFile::new("/store/b.root"),
        ],
    )?;
    store.set_file_state(&e.id, &["/store/a.root".to_string()], FileState::Completed)?;
    let got = store.input_files(&e.id)?;
    ensure!(got.len() == 2, "both files must be stored");
    let a = got
        .iter()
        .find(|f| f.lfn == "/store/a.root")
        .ok_or_else(|| anyhow!("file a missing"))?;
    ensure!(a.state == FileState::Completed, "file state must be updated");
    ensure!(a.parents == vec!["/store/p1.root".to_string()], "parents must round-trip");
    Ok(())
}

fn counts(store: &dyn ElementStore) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(ElementStatus::ALL.len());
    for status in ElementStatus::ALL {
        out.push(store.count_by_status(status, None, None)?);
    }
    Ok(out)
}

fn status_counts(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Cnt", "/Cnt/T").with_data_item("c"))?;
    store.update_status(&[e.id.clone()], ElementStatus::Negotiating, None)?;

    let before = counts(store)?;
    store.update_status(&[e.id.clone()], ElementStatus::Acquired, None)?;
    let after = counts(store)?;
    for (i, s) in ElementStatus::ALL.iter().enumerate() {
        let expected = match s {
            ElementStatus::Negotiating => before[i] - 1,
            ElementStatus::Acquired => before[i] + 1,
            _ => before[i],
        };
        ensure!(after[i] == expected, "{s} count must be {expected} after one move, got {}", after[i]);
    }

    ensure!(
        store.update_status(&[e.id.clone()], ElementStatus::Available, None).is_err(),
        "Acquired -> Available is not a legal move"
    );
    ensure!(counts(store)? == after, "refused transition must leave every count unchanged");
    Ok(())
}

fn injection(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Inj", "/Inj/T").with_data_item("i"))?;
    ensure!(store.record_injection(&e.id, 41).is_err(), "only a Negotiating element can be injected");
    let untouched = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?;
    ensure!(
        untouched.status == ElementStatus::Available && untouched.subscription_id.is_none(),
        "refused injection must change nothing"
    );

    store.update_status(&[e.id.clone()], ElementStatus::Negotiating, None)?;
    let negotiating = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?;
    store.record_injection(&e.id, 41)?;
    let got = store.get(&e.id)?.ok_or_else(|| anyhow!("missing"))?;
    ensure!(got.status == ElementStatus::Acquired, "injection must acquire the element");
    ensure!(got.subscription_id == Some(41), "injection must link the subscription");
    ensure!(got.version > negotiating.version, "injection must bump version");

    let other = store.create(NewElement::new("Inj", "/Inj/T").with_data_item("j"))?;
    store.set_subscription(&other.id, 5)?;
    store.update_status(&[other.id.clone()], ElementStatus::Negotiating, None)?;
    ensure!(
        store.record_injection(&other.id, 6).is_err(),
        "injection must not relink an element to another subscription"
    );
    ensure!(
        status_of(store, &other.id)? == ElementStatus::Negotiating,
        "refused relink must leave the element Negotiating"
    );
    Ok(())
}

fn unreported(store: &dyn ElementStore) -> Result<()> {
    let e = store.create(NewElement::new("Rep", "/Rep/T").with_data_item("r"))?;
    ensure!(
        !store.get_unreported()?.iter().any(|x| x.id == e.id),
        "a fresh element has nothing to report"
    );
    store.update_status(&[e.id.clone()], ElementStatus::Negotiating, None)?;
    let changed = store.get_unreported()?;
    ensure!(changed.iter().any(|x| x.id == e.id), "a changed element must be unreported");
    ensure!(changed.iter().all(|x| x.needs_report()), "only changed elements are returned");

    let v = version_of(store, &e.id)?;
    store.mark_reported(&e.id, v)?;
    ensure!(
        !store.get_unreported()?.iter().any(|x| x.id == e.id),
        "a reported element must drop out"
    );
    Ok(())
}

fn version_of(store: &dyn ElementStore, id: &ElementId) -> Result<u64> {
    Ok(store.get(id)?.ok_or_else(|| anyhow!("element {id} missing"))?.version)
}

fn status_of(store: &dyn ElementStore, id: &ElementId) -> Result<ElementStatus> {
    Ok(store.get(id)?.ok_or_else(|| anyhow!("element {id} missing"))?.status)
}
