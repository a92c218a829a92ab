//! Risk composition, cost ranking and risk bands.

use crate::{
    config::{RiskThresholds, RiskWeights},
    types::ProjectId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskComponent {
    Cost,
    Concentration,
    Dependency,
    Timeline,
}

impl RiskComponent {
    pub const ALL: [RiskComponent; 4] = [
        Self::Cost,
        Self::Concentration,
        Self::Dependency,
        Self::Timeline,
    ];

    pub fn weight(&self, weights: &RiskWeights) -> f64 {
        match self {
            Self::Cost          => weights.cost,
            Self::Concentration => weights.concentration,
            Self::Dependency    => weights.dependency,
            Self::Timeline      => weights.timeline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub cost:          Option<f64>,
    pub concentration: Option<f64>,
    pub dependency:    Option<f64>,
    pub timeline:      Option<f64>,
}

impl ComponentScores {
    pub fn get(&self, component: RiskComponent) -> Option<f64> {
        match component {
            RiskComponent::Cost          => self.cost,
            RiskComponent::Concentration => self.concentration,
            RiskComponent::Dependency    => self.dependency,
            RiskComponent::Timeline      => self.timeline,
        }
    }

    pub fn unknown_components(&self) -> Vec<RiskComponent> {
        RiskComponent::ALL
            .into_iter()
            .filter(|c| self.get(*c).is_none())
            .collect()
    }
}

/// Weighted overall score over the defined components.
///
/// Weights of unknown components are dropped and the remainder is
/// renormalised to sum to 1. Returns `None` when nothing is defined or
/// the defined components carry zero total weight.
pub fn compose(scores: &ComponentScores, weights: &RiskWeights) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for component in RiskComponent::ALL {
        if let Some(score) = scores.get(component) {
            let w = component.weight(weights);
            weighted += w * score;
            weight_sum += w;
        }
    }
    if weight_sum > 0.0 {
        Some(weighted / weight_sum)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn classify(score: f64, thresholds: &RiskThresholds) -> Self {
        if score < thresholds.low {
            Self::Low
        } else if score < thresholds.medium {
            Self::Medium
        } else if score < thresholds.high {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low      => "low",
            Self::Medium   => "medium",
            Self::High     => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low"      => Some(Self::Low),
            "medium"   => Some(Self::Medium),
            "high"     => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostRanking {
    pub rank:       Option<u32>,
    pub percentile: Option<f64>,
}

/// Standard competition ranking ("1224") ascending by cost-per-kW.
///
/// Tied values share the lowest position of their group and the next
/// distinct value skips past the group, so with costs 10, 20, 20, 30 the
/// ranks are 1, 2, 2, 4. Percentile is `(rank - 1) / (N - 1) * 100`
/// (0 when N = 1), matching SQL `PERCENT_RANK()`. Unknown costs get
/// neither rank nor percentile and do not count towards N.
pub fn competition_ranks(
    cost_per_kw: &BTreeMap<ProjectId, Option<f64>>,
) -> BTreeMap<ProjectId, CostRanking> {
    let mut defined: Vec<(&ProjectId, f64)> = cost_per_kw
        .iter()
        .filter_map(|(id, v)| v.map(|v| (id, v)))
        .collect();
    defined.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let n = defined.len();
    let mut ranks: BTreeMap<ProjectId, CostRanking> = cost_per_kw
        .keys()
        .map(|id| (id.clone(), CostRanking::default()))
        .collect();

    let mut rank = 0u32;
    let mut previous: Option<f64> = None;
    for (position, (id, value)) in defined.iter().enumerate() {
        if previous != Some(*value) {
            rank = position as u32 + 1;
            previous = Some(*value);
        }
        let percentile = if n > 1 {
            (rank - 1) as f64 / (n - 1) as f64 * 100.0
        } else {
            0.0
        };
        ranks.insert(
            (*id).clone(),
            CostRanking { rank: Some(rank), percentile: Some(percentile) },
        );
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn compose_uses_documented_weights() {
        let scores = ComponentScores {
            cost:          Some(80.0),
            concentration: Some(40.0),
            dependency:    Some(20.0),
            timeline:      Some(100.0),
        };
        let overall = compose(&scores, &RiskWeights::default()).unwrap();
        let expected = 0.35 * 80.0 + 0.25 * 40.0 + 0.25 * 20.0 + 0.15 * 100.0;
        assert!((overall - expected).abs() < TOL);
        assert!(scores.unknown_components().is_empty());
    }

    #[test]
    fn compose_renormalises_over_defined_components() {
        let scores = ComponentScores {
            cost:          None,
            concentration: Some(60.0),
            dependency:    Some(30.0),
            timeline:      Some(90.0),
        };
        let overall = compose(&scores, &RiskWeights::default()).unwrap();
        let expected = 60.0 * 0.25 / 0.65 + 30.0 * 0.25 / 0.65 + 90.0 * 0.15 / 0.65;
        assert!((overall - expected).abs() < TOL);
        assert_eq!(scores.unknown_components(), vec![RiskComponent::Cost]);
    }

    #[test]
    fn compose_all_unknown_is_unknown() {
        assert_eq!(compose(&ComponentScores::default(), &RiskWeights::default()), None);
    }

    #[test]
    fn competition_ranking_skips_after_ties() {
        let costs: BTreeMap<ProjectId, Option<f64>> = [
            ("A", Some(10.0)),
            ("B", Some(20.0)),
            ("C", Some(20.0)),
            ("D", Some(30.0)),
            ("E", None),
        ]
        .into_iter()
        .map(|(id, v)| (id.to_string(), v))
        .collect();
        let ranks = competition_ranks(&costs);

        assert_eq!(ranks["A"].rank, Some(1));
        assert_eq!(ranks["B"].rank, Some(2));
        assert_eq!(ranks["C"].rank, Some(2));
        assert_eq!(ranks["D"].rank, Some(4));
        assert_eq!(ranks["E"], CostRanking::default());

        assert_eq!(ranks["A"].percentile, Some(0.0));
        assert!((ranks["B"].percentile.unwrap() - 100.0 / 3.0).abs() < TOL);
        assert_eq!(ranks["D"].percentile, Some(100.0));
    }

    #[test]
    fn single_ranked_project_has_zero_percentile() {
        let costs: BTreeMap<ProjectId, Option<f64>> =
            [("A".to_string(), Some(55.0))].into_iter().collect();
        let ranks = competition_ranks(&costs);
        assert_eq!(ranks["A"], CostRanking { rank: Some(1), percentile: Some(0.0) });
    }

    #[test]
    fn risk_level_bands() {
        let t = RiskThresholds::default();
        assert_eq!(RiskLevel::classify(0.0, &t), RiskLevel::Low);
        assert_eq!(RiskLevel::classify(25.0, &t), RiskLevel::Medium);
        assert_eq!(RiskLevel::classify(74.99, &t), RiskLevel::High);
        assert_eq!(RiskLevel::classify(75.0, &t), RiskLevel::Critical);
    }
}
