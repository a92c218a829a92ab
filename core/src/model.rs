//! Input records for one cluster+phase, exactly as the ingestion
//! collaborator supplies them. The engine never mutates these in place;
//! withdrawal scenarios work on an owned copy.

use crate::types::{ClusterKey, ProjectId, UpgradeId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub key: ClusterKey,
    #[serde(default)]
    pub total_projects: Option<i64>,
    #[serde(default)]
    pub total_mw: Option<f64>,
    #[serde(default)]
    pub decision_deadline: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[default]
    Active,
    Withdrawn,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active    => "Active",
            Self::Withdrawn => "Withdrawn",
        }
    }

    /// Unrecognised statuses are treated as active queue positions.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("withdrawn") {
            Self::Withdrawn
        } else {
            Self::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub project_id: ProjectId,
    pub developer:  Option<String>,
    pub utility:    Option<String>,
    pub state:      Option<String>,
    pub fuel_type:  Option<String>,
    pub mw_capacity: Option<f64>,
    pub total_cost:  Option<f64>,
    // Cost buckets
    pub toif_cost:               Option<f64>,
    pub stand_alone_cost:        Option<f64>,
    pub network_upgrade_cost:    Option<f64>,
    pub system_reliability_cost: Option<f64>,
    // Readiness deposits
    pub rd1_amount: Option<f64>,
    pub rd2_amount: Option<f64>,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self { project_id: project_id.into(), ..Self::default() }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    /// Dollars per kW of capacity. Unknown unless capacity is positive
    /// and the total cost is present.
    pub fn cost_per_kw(&self) -> Option<f64> {
        cost_per_kw(self.total_cost, self.mw_capacity)
    }
}

pub fn cost_per_kw(total_cost: Option<f64>, mw_capacity: Option<f64>) -> Option<f64> {
    match (total_cost, mw_capacity) {
        (Some(cost), Some(mw)) if mw > 0.0 => Some(cost / (mw * 1000.0)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Upgrade {
    pub upgrade_id: UpgradeId,
    pub utility:    Option<String>,
    pub title:      Option<String>,
    pub total_cost: Option<f64>,
    pub shared_by_count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    CostAllocated,
    TaggedNoCost,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CostAllocated => "COST_ALLOCATED",
            Self::TaggedNoCost  => "TAGGED_NO_COST",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "COST_ALLOCATED" => Some(Self::CostAllocated),
            "TAGGED_NO_COST" => Some(Self::TaggedNoCost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpgradeLink {
    pub project_id: ProjectId,
    pub upgrade_id: UpgradeId,
    pub link_type:  LinkType,
    #[serde(default)]
    pub percent_allocation: Option<f64>,
    #[serde(default)]
    pub allocated_cost: Option<f64>,
    #[serde(default)]
    pub mw_impact: Option<f64>,
}

impl ProjectUpgradeLink {
    pub fn is_cost_allocated(&self) -> bool {
        self.link_type == LinkType::CostAllocated
    }

    /// Fraction of the upgrade this link pays for.
    ///
    /// Uses `percent_allocation` when present, otherwise derives it from
    /// `allocated_cost / upgrade.total_cost`. TAGGED_NO_COST links never
    /// carry a share.
    pub fn effective_share(&self, upgrade: Option<&Upgrade>) -> Option<f64> {
        if !self.is_cost_allocated() {
            return None;
        }
        if let Some(share) = self.percent_allocation {
            return Some(share);
        }
        let total = upgrade.and_then(|u| u.total_cost).filter(|t| *t > 0.0)?;
        self.allocated_cost.map(|cost| cost / total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MwContribution {
    pub project_id: ProjectId,
    pub mw_contribution: f64,
    #[serde(default)]
    pub contribution_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FacilityOverload {
    pub overload_id:      String,
    pub facility_name:    String,
    pub contingency_name: Option<String>,
    pub contingency_type: Option<String>,
    pub loading_pct:      f64,
    pub rating_mva:       f64,
    pub mva_to_mitigate:  Option<f64>,
    pub contributions:    Vec<MwContribution>,
}

impl FacilityOverload {
    /// Total MW this project pushes onto the facility.
    pub fn contribution_of(&self, project_id: &str) -> f64 {
        self.contributions
            .iter()
            .filter(|c| c.project_id == project_id)
            .map(|c| c.mw_contribution)
            .sum()
    }
}

/// A complete, internally consistent bulk read for one cluster+phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster: Cluster,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub upgrades: Vec<Upgrade>,
    #[serde(default)]
    pub links: Vec<ProjectUpgradeLink>,
    #[serde(default)]
    pub overloads: Vec<FacilityOverload>,
}

impl ClusterSnapshot {
    pub fn empty(key: ClusterKey) -> Self {
        Self {
            cluster: Cluster { key, total_projects: None, total_mw: None, decision_deadline: None },
            projects: Vec::new(),
            upgrades: Vec::new(),
            links: Vec::new(),
            overloads: Vec::new(),
        }
    }

    pub fn key(&self) -> &ClusterKey {
        &self.cluster.key
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }

    pub fn active_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter().filter(|p| p.is_active())
    }

    pub fn upgrade_index(&self) -> BTreeMap<&str, &Upgrade> {
        self.upgrades
            .iter()
            .map(|u| (u.upgrade_id.as_str(), u))
            .collect()
    }

    pub fn links_for(&self, project_id: &str) -> impl Iterator<Item = &ProjectUpgradeLink> {
        let project_id = project_id.to_string();
        self.links.iter().filter(move |l| l.project_id == project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_per_kw_requires_positive_capacity() {
        assert_eq!(cost_per_kw(Some(5_000_000.0), Some(100.0)), Some(50.0));
        assert_eq!(cost_per_kw(Some(5_000_000.0), None), None);
        assert_eq!(cost_per_kw(Some(5_000_000.0), Some(0.0)), None);
        assert_eq!(cost_per_kw(None, Some(100.0)), None);
    }

    #[test]
    fn effective_share_falls_back_to_cost_ratio() {
        let upgrade = Upgrade {
            upgrade_id: "U".into(),
            total_cost: Some(10_000_000.0),
            ..Upgrade::default()
        };
        let link = ProjectUpgradeLink {
            project_id: "A".into(),
            upgrade_id: "U".into(),
            link_type: LinkType::CostAllocated,
            percent_allocation: None,
            allocated_cost: Some(2_500_000.0),
            mw_impact: None,
        };
        assert_eq!(link.effective_share(Some(&upgrade)), Some(0.25));
        assert_eq!(link.effective_share(None), None);

        let tagged = ProjectUpgradeLink { link_type: LinkType::TaggedNoCost, ..link };
        assert_eq!(tagged.effective_share(Some(&upgrade)), None);
    }

    #[test]
    fn link_type_uses_ledger_spelling() {
        let json = serde_json::to_string(&LinkType::TaggedNoCost).unwrap();
        assert_eq!(json, "\"TAGGED_NO_COST\"");
        assert_eq!(LinkType::parse("COST_ALLOCATED"), Some(LinkType::CostAllocated));
        assert_eq!(LinkType::parse("other"), None);
    }
}
