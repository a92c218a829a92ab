//! One cluster+phase scoring pass: ledger resolution, co-dependency graph,
//! component metrics, composition and ranking, then invariant checks.
//!
//! Pure computation over an owned snapshot; no I/O happens here.

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    graph::CodependencyGraph,
    ledger,
    metrics,
    model::ClusterSnapshot,
    risk::{self, ComponentScores, RiskComponent, RiskLevel},
    types::{ClusterKey, ProjectId, UpgradeId},
    warning::{DataQualityWarning, WarningLog},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every derived field the engine owns for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectScores {
    pub project_id:         ProjectId,
    pub total_cost:         Option<f64>,
    pub cost_per_kw:        Option<f64>,
    pub cost_rank:          Option<u32>,
    pub cost_percentile:    Option<f64>,
    pub components:         ComponentScores,
    pub risk_score_overall: Option<f64>,
    pub risk_level:         Option<RiskLevel>,
    pub unknown_components: Vec<RiskComponent>,
    pub codependent_project_ids: Vec<ProjectId>,
    pub overload_exposure:  usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCluster {
    pub key:              ClusterKey,
    pub projects:         BTreeMap<ProjectId, ProjectScores>,
    pub shared_by_counts: BTreeMap<UpgradeId, i64>,
    pub total_projects:   i64,
    pub total_mw:         f64,
    pub warnings:         Vec<DataQualityWarning>,
}

impl ScoredCluster {
    pub fn project(&self, project_id: &str) -> Option<&ProjectScores> {
        self.projects.get(project_id)
    }
}

pub fn score_snapshot(
    snapshot: &ClusterSnapshot,
    config: &EngineConfig,
) -> EngineResult<ScoredCluster> {
    let key = snapshot.key().clone();
    check_inputs(snapshot)?;

    let mut warnings = WarningLog::new();
    let ledger = ledger::resolve(snapshot, config.allocation_epsilon, &mut warnings);

    let active_ids: Vec<ProjectId> = snapshot
        .active_projects()
        .map(|p| p.project_id.clone())
        .collect();
    let graph = CodependencyGraph::build(&active_ids, &ledger.links, &config.codependency);
    let (aggregates, stats) = metrics::aggregate(snapshot, &ledger, &graph, &mut warnings);

    let cost_per_kw: BTreeMap<ProjectId, Option<f64>> = aggregates
        .iter()
        .map(|(id, agg)| (id.clone(), agg.cost_per_kw))
        .collect();
    let cost_scores = metrics::cost_scores(&cost_per_kw);
    let rankings = risk::competition_ranks(&cost_per_kw);

    let mut projects = BTreeMap::new();
    for (id, agg) in &aggregates {
        let components = ComponentScores {
            cost:          cost_scores.get(id).copied().flatten(),
            concentration: metrics::concentration_score(agg),
            dependency:    Some(metrics::dependency_score(agg, &stats)),
            timeline:      Some(metrics::timeline_score(agg, &stats)),
        };
        let overall = risk::compose(&components, &config.weights);
        let ranking = rankings.get(id).copied().unwrap_or_default();
        projects.insert(
            id.clone(),
            ProjectScores {
                project_id:         id.clone(),
                total_cost:         agg.total_cost,
                cost_per_kw:        agg.cost_per_kw,
                cost_rank:          ranking.rank,
                cost_percentile:    ranking.percentile,
                components,
                risk_score_overall: overall,
                risk_level:         overall.map(|s| RiskLevel::classify(s, &config.thresholds)),
                unknown_components: components.unknown_components(),
                codependent_project_ids: graph.codependents(id).cloned().collect(),
                overload_exposure:  agg.overload_exposure,
            },
        );
    }

    let scored = ScoredCluster {
        key,
        projects,
        shared_by_counts: ledger
            .shared_by_counts()
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect(),
        total_projects: active_ids.len() as i64,
        total_mw: snapshot
            .active_projects()
            .filter_map(|p| p.mw_capacity)
            .filter(|mw| *mw > 0.0)
            .sum(),
        warnings: warnings.into_vec(),
    };
    if !graph.is_well_formed() {
        return Err(violation(&scored.key, "co-dependency relation is not symmetric"));
    }
    validate(&scored)?;
    log::debug!(
        "{}: scored {} projects ({} warnings)",
        scored.key,
        scored.projects.len(),
        scored.warnings.len()
    );
    Ok(scored)
}

fn check_inputs(snapshot: &ClusterSnapshot) -> EngineResult<()> {
    let key = snapshot.key();
    for project in snapshot.active_projects() {
        if project.total_cost.is_some_and(|c| c < 0.0 || !c.is_finite()) {
            return Err(violation(
                key,
                format!("project {} has invalid total cost", project.project_id),
            ));
        }
    }
    for link in &snapshot.links {
        if link.allocated_cost.is_some_and(|c| c < 0.0 || !c.is_finite()) {
            return Err(violation(
                key,
                format!(
                    "link {} -> {} has invalid allocated cost",
                    link.project_id, link.upgrade_id
                ),
            ));
        }
        if link.percent_allocation.is_some_and(|s| s < 0.0 || !s.is_finite()) {
            return Err(violation(
                key,
                format!(
                    "link {} -> {} has invalid allocation share",
                    link.project_id, link.upgrade_id
                ),
            ));
        }
    }
    Ok(())
}

/// Structural checks run before anything is published.
pub fn validate(scored: &ScoredCluster) -> EngineResult<()> {
    let key = &scored.key;

    let mut ranked: Vec<(f64, u32)> = Vec::new();
    for p in scored.projects.values() {
        match (p.cost_per_kw, p.cost_rank, p.cost_percentile) {
            (Some(cost), Some(rank), Some(_)) => ranked.push((cost, rank)),
            (None, None, None) => {}
            _ => {
                return Err(violation(
                    key,
                    format!("project {} has inconsistent rank fields", p.project_id),
                ))
            }
        }
        let scores = [
            p.components.cost,
            p.components.concentration,
            p.components.dependency,
            p.components.timeline,
            p.cost_percentile,
            p.risk_score_overall,
        ];
        if scores.iter().flatten().any(|s| !(0.0..=100.0 + 1e-9).contains(s)) {
            return Err(violation(
                key,
                format!("project {} has a score outside [0, 100]", p.project_id),
            ));
        }
    }

    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    for (i, pair) in ranked.windows(2).enumerate() {
        let ((cost_a, rank_a), (cost_b, rank_b)) = (pair[0], pair[1]);
        let ok = if cost_a == cost_b {
            rank_a == rank_b
        } else {
            rank_b == i as u32 + 2
        };
        if !ok {
            return Err(violation(key, "rank sequence is malformed"));
        }
    }
    if ranked.first().is_some_and(|(_, rank)| *rank != 1) {
        return Err(violation(key, "rank sequence does not start at 1"));
    }
    Ok(())
}

fn violation(key: &ClusterKey, detail: impl Into<String>) -> EngineError {
    EngineError::InvariantViolation { key: key.clone(), detail: detail.into() }
}
