//! Co-dependency graph over the projects of one cluster+phase.
//!
//! Upgrades form a hypergraph over projects; each upgrade shared by k
//! projects is expanded into a k-clique. The result is a plain adjacency
//! set keyed by project id, built once per batch.

use crate::{
    config::CodependencyPolicy,
    model::ProjectUpgradeLink,
    types::ProjectId,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodependencyGraph {
    adjacency: BTreeMap<ProjectId, BTreeSet<ProjectId>>,
}

impl CodependencyGraph {
    /// Every id in `project_ids` gets an entry, isolated or not.
    /// `links` must already be resolved (see `ledger::resolve`).
    pub fn build<'a, I>(
        project_ids: I,
        links: &[&ProjectUpgradeLink],
        policy: &CodependencyPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = &'a ProjectId>,
    {
        let mut adjacency: BTreeMap<ProjectId, BTreeSet<ProjectId>> = project_ids
            .into_iter()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        let mut by_upgrade: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for link in links.iter().filter(|l| policy.counts(l.link_type)) {
            by_upgrade
                .entry(link.upgrade_id.as_str())
                .or_default()
                .insert(link.project_id.as_str());
        }

        let mut edges = 0usize;
        for members in by_upgrade.values().filter(|m| m.len() >= 2) {
            for a in members {
                for b in members {
                    if a == b {
                        continue;
                    }
                    if adjacency
                        .entry(a.to_string())
                        .or_default()
                        .insert(b.to_string())
                    {
                        edges += 1;
                    }
                }
            }
        }
        log::debug!(
            "co-dependency graph: {} projects, {} edges from {} upgrades",
            adjacency.len(),
            edges / 2,
            by_upgrade.len()
        );

        Self { adjacency }
    }

    pub fn codependents(&self, project_id: &str) -> impl Iterator<Item = &ProjectId> {
        self.adjacency.get(project_id).into_iter().flatten()
    }

    pub fn degree(&self, project_id: &str) -> usize {
        self.adjacency.get(project_id).map_or(0, BTreeSet::len)
    }

    pub fn max_degree(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// True when the relation is symmetric and irreflexive.
    pub fn is_well_formed(&self) -> bool {
        self.adjacency.iter().all(|(a, neighbours)| {
            !neighbours.contains(a)
                && neighbours
                    .iter()
                    .all(|b| self.adjacency.get(b).is_some_and(|back| back.contains(a)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkType;

    fn link(project: &str, upgrade: &str, link_type: LinkType) -> ProjectUpgradeLink {
        ProjectUpgradeLink {
            project_id: project.into(),
            upgrade_id: upgrade.into(),
            link_type,
            percent_allocation: None,
            allocated_cost: None,
            mw_impact: None,
        }
    }

    fn ids(names: &[&str]) -> Vec<ProjectId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clique_expansion_is_symmetric_and_irreflexive() {
        let links = [
            link("A", "U1", LinkType::CostAllocated),
            link("B", "U1", LinkType::CostAllocated),
            link("C", "U1", LinkType::TaggedNoCost),
            link("C", "U2", LinkType::CostAllocated),
            link("D", "U2", LinkType::CostAllocated),
        ];
        let refs: Vec<&ProjectUpgradeLink> = links.iter().collect();
        let projects = ids(&["A", "B", "C", "D", "E"]);
        let graph = CodependencyGraph::build(&projects, &refs, &CodependencyPolicy::default());

        assert!(graph.is_well_formed());
        assert_eq!(graph.degree("A"), 2);
        assert_eq!(graph.degree("C"), 3);
        assert_eq!(graph.degree("D"), 1);
        assert_eq!(graph.degree("E"), 0);
        assert_eq!(graph.max_degree(), 3);
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn policy_can_exclude_tagged_links() {
        let links = [
            link("A", "U1", LinkType::CostAllocated),
            link("B", "U1", LinkType::TaggedNoCost),
        ];
        let refs: Vec<&ProjectUpgradeLink> = links.iter().collect();
        let projects = ids(&["A", "B"]);
        let graph = CodependencyGraph::build(
            &projects,
            &refs,
            &CodependencyPolicy::cost_allocated_only(),
        );
        assert_eq!(graph.degree("A"), 0);
        assert_eq!(graph.max_degree(), 0);
    }

    #[test]
    fn single_holder_and_duplicate_links_add_no_edges() {
        let links = [
            link("A", "U1", LinkType::CostAllocated),
            link("A", "U1", LinkType::TaggedNoCost),
        ];
        let refs: Vec<&ProjectUpgradeLink> = links.iter().collect();
        let projects = ids(&["A"]);
        let graph = CodependencyGraph::build(&projects, &refs, &CodependencyPolicy::default());
        assert_eq!(graph.degree("A"), 0);
        assert!(graph.is_well_formed());
    }
}
