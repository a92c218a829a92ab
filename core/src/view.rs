//! Read models served to the dashboard and chat collaborators.

use crate::{
    risk::{ComponentScores, RiskComponent, RiskLevel},
    types::{ClusterKey, ProjectId, RunId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Published derived fields for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRiskView {
    pub project_id:         ProjectId,
    pub run_id:             RunId,
    pub total_cost:         Option<f64>,
    pub cost_per_kw:        Option<f64>,
    pub cost_rank:          Option<u32>,
    pub cost_percentile:    Option<f64>,
    pub risk_score_overall: Option<f64>,
    pub components:         ComponentScores,
    pub unknown_components: Vec<RiskComponent>,
    pub risk_level:         Option<RiskLevel>,
    pub codependent_project_ids: Vec<ProjectId>,
    pub overload_exposure:  usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentAverages {
    pub cost:          Option<f64>,
    pub concentration: Option<f64>,
    pub dependency:    Option<f64>,
    pub timeline:      Option<f64>,
    pub overall:       Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub key:               ClusterKey,
    pub run_id:            Option<RunId>,
    pub total_projects:    i64,
    pub total_mw:          Option<f64>,
    pub total_cost:        Option<f64>,
    pub avg_cost_per_kw:   Option<f64>,
    pub avg_risk_score:    Option<f64>,
    /// Count per risk level ("low", "medium", ...).
    pub risk_distribution: BTreeMap<String, i64>,
    /// Count per cost-percentile quintile ("q1" .. "q5").
    pub cost_distribution: BTreeMap<String, i64>,
    pub component_averages: ComponentAverages,
}

/// $/kW histogram over published projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostHistogram {
    pub bin_size: f64,
    pub labels:   Vec<String>,
    pub counts:   Vec<usize>,
    pub total_projects: usize,
}

impl CostHistogram {
    pub const BIN_SIZE: f64 = 100.0;
    pub const MAX_BINS: usize = 50;

    /// Values past the last bin are folded into it.
    pub fn from_views(views: &[ProjectRiskView]) -> Self {
        let costs: Vec<f64> = views
            .iter()
            .filter_map(|v| v.cost_per_kw)
            .filter(|c| *c > 0.0)
            .collect();
        let max = costs.iter().copied().fold(0.0_f64, f64::max);
        if costs.is_empty() {
            return Self { bin_size: Self::BIN_SIZE, labels: Vec::new(), counts: Vec::new(), total_projects: 0 };
        }
        let bins = ((max / Self::BIN_SIZE).ceil() as usize).clamp(1, Self::MAX_BINS);
        let mut counts = vec![0usize; bins];
        for c in &costs {
            let idx = ((c / Self::BIN_SIZE) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        let labels = (0..bins)
            .map(|i| {
                let lo = i as f64 * Self::BIN_SIZE;
                format!("${lo:.0}-{:.0}", lo + Self::BIN_SIZE)
            })
            .collect();
        Self { bin_size: Self::BIN_SIZE, labels, counts, total_projects: costs.len() }
    }
}
