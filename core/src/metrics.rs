//! The four component calculators.
//!
//! Every score is in [0, 100]; `None` is an unknown metric and is carried
//! through composition as-is, never coerced to zero.

use crate::{
    graph::CodependencyGraph,
    ledger::ResolvedLedger,
    model::{ClusterSnapshot, LinkType},
    types::ProjectId,
    warning::{DataQualityWarning, WarningLog},
};
use std::collections::BTreeMap;

/// Per-project inputs to the calculators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectAggregates {
    pub total_cost:        Option<f64>,
    pub cost_per_kw:       Option<f64>,
    /// Largest single COST_ALLOCATED `allocated_cost`.
    pub max_allocated:     Option<f64>,
    pub allocated_sum:     f64,
    pub cost_link_count:   usize,
    pub tagged_link_count: usize,
    pub codependent_count: usize,
    /// Distinct facility overloads this project contributes MW to.
    pub overload_exposure: usize,
}

/// Cluster-wide normalisation maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterStats {
    pub max_codependent: usize,
    pub max_tagged:      usize,
}

pub fn aggregate(
    snapshot: &ClusterSnapshot,
    ledger: &ResolvedLedger<'_>,
    graph: &CodependencyGraph,
    warnings: &mut WarningLog,
) -> (BTreeMap<ProjectId, ProjectAggregates>, ClusterStats) {
    let mut aggregates: BTreeMap<ProjectId, ProjectAggregates> = BTreeMap::new();
    for project in snapshot.active_projects() {
        if let Some(mw) = project.mw_capacity.filter(|mw| *mw <= 0.0) {
            warnings.record(DataQualityWarning::NonPositiveCapacity {
                project_id:  project.project_id.clone(),
                mw_capacity: mw,
            });
        }
        aggregates.insert(
            project.project_id.clone(),
            ProjectAggregates {
                total_cost:        project.total_cost,
                cost_per_kw:       project.cost_per_kw(),
                codependent_count: graph.degree(&project.project_id),
                ..ProjectAggregates::default()
            },
        );
    }

    for link in &ledger.links {
        let Some(agg) = aggregates.get_mut(&link.project_id) else {
            continue;
        };
        match link.link_type {
            LinkType::CostAllocated => {
                agg.cost_link_count += 1;
                if let Some(cost) = link.allocated_cost {
                    agg.allocated_sum += cost;
                    agg.max_allocated = Some(agg.max_allocated.map_or(cost, |m| m.max(cost)));
                }
            }
            LinkType::TaggedNoCost => agg.tagged_link_count += 1,
        }
    }

    for overload in &snapshot.overloads {
        let mut seen: Vec<&str> = Vec::new();
        for c in overload.contributions.iter().filter(|c| c.mw_contribution > 0.0) {
            if seen.contains(&c.project_id.as_str()) {
                continue;
            }
            seen.push(c.project_id.as_str());
            if let Some(agg) = aggregates.get_mut(&c.project_id) {
                agg.overload_exposure += 1;
            }
        }
    }

    let stats = ClusterStats {
        max_codependent: aggregates.values().map(|a| a.codependent_count).max().unwrap_or(0),
        max_tagged:      aggregates.values().map(|a| a.tagged_link_count).max().unwrap_or(0),
    };
    (aggregates, stats)
}

/// Percentile of each defined cost-per-kW within the defined population,
/// using average ranks for ties: `(avg_rank - 1) / (N - 1) * 100`.
pub fn cost_scores(
    cost_per_kw: &BTreeMap<ProjectId, Option<f64>>,
) -> BTreeMap<ProjectId, Option<f64>> {
    let mut defined: Vec<(&ProjectId, f64)> = cost_per_kw
        .iter()
        .filter_map(|(id, v)| v.map(|v| (id, v)))
        .collect();
    defined.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let n = defined.len();
    let mut scores: BTreeMap<ProjectId, Option<f64>> =
        cost_per_kw.keys().map(|id| (id.clone(), None)).collect();

    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && defined[end + 1].1 == defined[start].1 {
            end += 1;
        }
        // 1-based positions start+1 ..= end+1
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        let score = if n > 1 {
            (avg_rank - 1.0) / (n - 1) as f64 * 100.0
        } else {
            0.0
        };
        for (id, _) in &defined[start..=end] {
            scores.insert((*id).clone(), Some(score));
        }
        start = end + 1;
    }
    scores
}

/// Share of the project's cost carried by its single largest upgrade.
pub fn concentration_score(agg: &ProjectAggregates) -> Option<f64> {
    if agg.cost_link_count == 0 {
        return Some(0.0);
    }
    let largest = agg.max_allocated.unwrap_or(0.0);
    let denominator = match agg.total_cost {
        Some(total) if total > 0.0 => total,
        _ if agg.allocated_sum > 0.0 => agg.allocated_sum,
        _ => return None,
    };
    Some((largest / denominator * 100.0).clamp(0.0, 100.0))
}

pub fn dependency_score(agg: &ProjectAggregates, stats: &ClusterStats) -> f64 {
    normalised(agg.codependent_count, stats.max_codependent)
}

pub fn timeline_score(agg: &ProjectAggregates, stats: &ClusterStats) -> f64 {
    normalised(agg.tagged_link_count, stats.max_tagged)
}

fn normalised(count: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        count as f64 / max as f64 * 100.0
    }
}
