//! Link resolution: the validated view of the allocation ledger that every
//! calculator works from.
//!
//! Links to unknown projects or upgrades are dropped with a warning.
//! Links held by withdrawn projects are dropped silently: a withdrawn
//! project is no longer part of the scoring population.

use crate::{
    model::{ClusterSnapshot, ProjectUpgradeLink, Upgrade},
    warning::{DataQualityWarning, MissingSide, WarningLog},
};
use std::collections::{BTreeMap, BTreeSet};

pub struct ResolvedLedger<'a> {
    pub links:    Vec<&'a ProjectUpgradeLink>,
    pub upgrades: BTreeMap<&'a str, &'a Upgrade>,
}

pub fn resolve<'a>(
    snapshot: &'a ClusterSnapshot,
    epsilon: f64,
    warnings: &mut WarningLog,
) -> ResolvedLedger<'a> {
    let upgrades = snapshot.upgrade_index();
    let known: BTreeMap<&str, bool> = snapshot
        .projects
        .iter()
        .map(|p| (p.project_id.as_str(), p.is_active()))
        .collect();

    let mut links = Vec::with_capacity(snapshot.links.len());
    let mut dropped_withdrawn = 0usize;
    for link in &snapshot.links {
        match known.get(link.project_id.as_str()) {
            None => {
                warnings.record(DataQualityWarning::DanglingLink {
                    project_id: link.project_id.clone(),
                    upgrade_id: link.upgrade_id.clone(),
                    missing:    MissingSide::Project,
                });
                continue;
            }
            Some(false) => {
                dropped_withdrawn += 1;
                continue;
            }
            Some(true) => {}
        }
        let Some(upgrade) = upgrades.get(link.upgrade_id.as_str()) else {
            warnings.record(DataQualityWarning::DanglingLink {
                project_id: link.project_id.clone(),
                upgrade_id: link.upgrade_id.clone(),
                missing:    MissingSide::Upgrade,
            });
            continue;
        };
        if link.is_cost_allocated() && link.effective_share(Some(upgrade)).is_none() {
            warnings.record(DataQualityWarning::MissingAllocationShare {
                project_id: link.project_id.clone(),
                upgrade_id: link.upgrade_id.clone(),
            });
        }
        links.push(link);
    }
    if dropped_withdrawn > 0 {
        log::debug!(
            "{}: ignored {dropped_withdrawn} links held by withdrawn projects",
            snapshot.key()
        );
    }

    let ledger = ResolvedLedger { links, upgrades };
    for (upgrade_id, total_share) in ledger.share_totals() {
        if total_share > 1.0 + epsilon {
            warnings.record(DataQualityWarning::AllocationOverflow {
                upgrade_id: upgrade_id.to_string(),
                total_share,
            });
        }
    }
    ledger
}

impl<'a> ResolvedLedger<'a> {
    pub fn share_of(&self, link: &ProjectUpgradeLink) -> Option<f64> {
        link.effective_share(self.upgrades.get(link.upgrade_id.as_str()).copied())
    }

    /// Sum of known COST_ALLOCATED shares per upgrade.
    pub fn share_totals(&self) -> BTreeMap<&'a str, f64> {
        let mut totals: BTreeMap<&'a str, f64> = BTreeMap::new();
        for link in &self.links {
            if let Some(share) = self.share_of(link) {
                *totals.entry(link.upgrade_id.as_str()).or_default() += share;
            }
        }
        totals
    }

    /// COST_ALLOCATED links on one upgrade, in ledger order.
    pub fn cost_links_for_upgrade(&self, upgrade_id: &str) -> Vec<&'a ProjectUpgradeLink> {
        self.links
            .iter()
            .copied()
            .filter(|l| l.upgrade_id == upgrade_id && l.is_cost_allocated())
            .collect()
    }

    /// Distinct COST_ALLOCATED projects per upgrade (the `shared_by_count`).
    pub fn shared_by_counts(&self) -> BTreeMap<&'a str, i64> {
        let mut holders: BTreeMap<&'a str, BTreeSet<&'a str>> = BTreeMap::new();
        for link in self.links.iter().filter(|l| l.is_cost_allocated()) {
            holders
                .entry(link.upgrade_id.as_str())
                .or_default()
                .insert(link.project_id.as_str());
        }
        holders
            .into_iter()
            .map(|(upgrade_id, projects)| (upgrade_id, projects.len() as i64))
            .collect()
    }
}
