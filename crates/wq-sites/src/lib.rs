//! Site validity resolution.
//!
//! Decides where an element may run from its white/black-list records, the
//! locations of its input data, and the set of currently usable sites.

pub mod locations;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::debug;
use wq_catalog::SiteStatusFeed;

pub use locations::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub valid_sites: BTreeSet<String>,
    /// True when the element carried no white-list entry.
    pub any_site: bool,
}

impl Resolution {
    pub fn is_unschedulable(&self) -> bool {
        self.valid_sites.is_empty()
    }
}

pub struct SiteResolver {
    usable: BTreeSet<String>,
}

impl SiteResolver {
    pub fn new(usable: BTreeSet<String>) -> Self {
        Self { usable }
    }

    pub fn from_feed(feed: &dyn SiteStatusFeed) -> Result<Self> {
        Ok(Self::new(feed.usable_sites()?))
    }

    pub fn usable_sites(&self) -> &BTreeSet<String> {
        &self.usable
    }

    /// Resolve the valid sites of an element.
    ///
    /// `sites` are the element's own records (true = white, false = black) and are
    /// merged with the extra `white`/`black` lists. `data_locations` is `None` for work
    /// without input data. A black-list entry always beats a white-list entry.
    pub fn resolve(
        &self,
        sites: &BTreeMap<String, bool>,
        data_locations: Option<&BTreeSet<String>>,
        white: &BTreeSet<String>,
        black: &BTreeSet<String>,
    ) -> Resolution {
        let mut white_all: BTreeSet<String> = white.clone();
        let mut black_all: BTreeSet<String> = black.clone();
        for (site, valid) in sites {
            if *valid {
                white_all.insert(site.clone());
            } else {
                black_all.insert(site.clone());
            }
        }

        let any_site = white_all.is_empty();
        let candidates: BTreeSet<String> = if any_site { self.usable.clone() } else { white_all };
        let valid_sites: BTreeSet<String> = candidates
            .into_iter()
            .filter(|s| data_locations.map_or(true, |locs| locs.contains(s)))
            .filter(|s| !black_all.contains(s))
            .collect();

        debug!(valid = ?valid_sites, any_site, "resolved sites");
        Resolution { valid_sites, any_site }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn black_list_wins_over_white_list() {
        let resolver = SiteResolver::new(set(&["A", "B", "C"]));
        let r = resolver.resolve(
            &BTreeMap::new(),
            Some(&set(&["A", "B", "C"])),
            &set(&["A", "B"]),
            &set(&["B"]),
        );
        assert_eq!(r.valid_sites, set(&["A"]));
        assert!(!r.any_site);
    }

    #[test]
    fn element_records_act_as_lists() {
        let resolver = SiteResolver::new(set(&["A", "B", "C"]));
        let sites = BTreeMap::from([("A".to_string(), true), ("B".to_string(), true), ("B2".to_string(), false)]);
        let r = resolver.resolve(&sites, Some(&set(&["A", "B"])), &set(&[]), &set(&["B"]));
        assert_eq!(r.valid_sites, set(&["A"]));
    }

    #[test]
    fn no_white_list_means_usable_sites_with_data() {
        let resolver = SiteResolver::new(set(&["A", "B", "C"]));
        let r = resolver.resolve(&BTreeMap::new(), Some(&set(&["B", "C", "D"])), &set(&[]), &set(&["C"]));
        assert_eq!(r.valid_sites, set(&["B"]));
        assert!(r.any_site);
    }

    #[test]
    fn generated_work_runs_anywhere_usable() {
        let resolver = SiteResolver::new(set(&["A", "B"]));
        let r = resolver.resolve(&BTreeMap::new(), None, &set(&[]), &set(&[]));
        assert_eq!(r.valid_sites, set(&["A", "B"]));
    }

    #[test]
    fn empty_intersection_is_unschedulable() {
        let resolver = SiteResolver::new(set(&["A"]));
        let r = resolver.resolve(&BTreeMap::new(), Some(&set(&["Z"])), &set(&[]), &set(&[]));
        assert!(r.is_unschedulable());
    }
}
