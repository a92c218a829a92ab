//! Withdrawal simulation.
//!
//! A withdrawal scenario starts PROPOSED: an in-memory what-if built from
//! an owned snapshot, never written anywhere. Only the orchestrator moves
//! a scenario to APPLIED, after which its rewritten ledger becomes the new
//! baseline for the cluster.
//!
//! For each upgrade the withdrawing project pays into, its share moves to
//! the remaining COST_ALLOCATED holders in proportion to their existing
//! shares: `new_i = old_i / sum(remaining old)`. When the baseline shares
//! sum to 1 this is `old_i / (1 - withdrawn_share)`.

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    ledger,
    model::{ClusterSnapshot, ProjectStatus, ProjectUpgradeLink},
    risk::ComponentScores,
    scoring::{self, ProjectScores},
    types::{ClusterKey, ProjectId, UpgradeId},
    warning::{DataQualityWarning, WarningLog},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Proposed,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkReallocation {
    pub project_id: ProjectId,
    pub old_share:  f64,
    pub new_share:  f64,
    pub old_cost:   Option<f64>,
    pub new_cost:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeReallocation {
    pub upgrade_id:      UpgradeId,
    pub withdrawn_share: Option<f64>,
    pub withdrawn_cost:  f64,
    /// Cost the shares are applied to: the upgrade total, or the sum of its
    /// allocated costs when the total is unknown.
    pub cost_basis:      f64,
    pub links:           Vec<LinkReallocation>,
    /// Set when no remaining holder can absorb the withdrawn share.
    pub unallocated_cost: Option<f64>,
}

impl UpgradeReallocation {
    pub fn is_unallocated(&self) -> bool {
        self.unallocated_cost.is_some()
    }

    pub fn new_share_total(&self) -> f64 {
        self.links.iter().map(|l| l.new_share).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactFigures {
    pub total_cost:         Option<f64>,
    pub cost_per_kw:        Option<f64>,
    pub cost_rank:          Option<u32>,
    pub cost_percentile:    Option<f64>,
    pub components:         ComponentScores,
    pub risk_score_overall: Option<f64>,
}

impl From<&ProjectScores> for ImpactFigures {
    fn from(s: &ProjectScores) -> Self {
        Self {
            total_cost:         s.total_cost,
            cost_per_kw:        s.cost_per_kw,
            cost_rank:          s.cost_rank,
            cost_percentile:    s.cost_percentile,
            components:         s.components,
            risk_score_overall: s.risk_score_overall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectImpact {
    pub project_id: ProjectId,
    pub cost_delta: f64,
    pub before:     ImpactFigures,
    pub after:      ImpactFigures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverloadImpact {
    pub overload_id:        String,
    pub facility_name:      String,
    pub withdrawn_mw:       f64,
    pub loading_pct_before: f64,
    /// Unknown when the facility has no usable rating.
    pub loading_pct_after:  Option<f64>,
    pub relieved:           bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalDiff {
    pub key:                  ClusterKey,
    pub withdrawn_project_id: ProjectId,
    pub state:                ScenarioState,
    pub upgrades:             Vec<UpgradeReallocation>,
    pub affected:             Vec<ProjectImpact>,
    pub overloads:            Vec<OverloadImpact>,
    pub warnings:             Vec<DataQualityWarning>,
}

impl WithdrawalDiff {
    fn noop(key: ClusterKey, project_id: ProjectId, warnings: Vec<DataQualityWarning>) -> Self {
        Self {
            key,
            withdrawn_project_id: project_id,
            state: ScenarioState::Proposed,
            upgrades: Vec::new(),
            affected: Vec::new(),
            overloads: Vec::new(),
            warnings,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.upgrades.is_empty()
    }

    pub fn affected_project_ids(&self) -> Vec<&str> {
        self.affected.iter().map(|a| a.project_id.as_str()).collect()
    }

    pub fn changed_upgrade_ids(&self) -> Vec<&str> {
        self.upgrades.iter().map(|u| u.upgrade_id.as_str()).collect()
    }

    pub fn impact_for(&self, project_id: &str) -> Option<&ProjectImpact> {
        self.affected.iter().find(|a| a.project_id == project_id)
    }
}

/// A proposed withdrawal: the diff plus the hypothetical ledger it implies.
#[derive(Debug, Clone)]
pub struct WithdrawalScenario {
    scenario: ClusterSnapshot,
    diff:     WithdrawalDiff,
}

impl WithdrawalScenario {
    pub fn diff(&self) -> &WithdrawalDiff {
        &self.diff
    }

    /// The cluster as it would look after the withdrawal.
    pub fn scenario_snapshot(&self) -> &ClusterSnapshot {
        &self.scenario
    }

    pub fn into_diff(self) -> WithdrawalDiff {
        self.diff
    }

    /// Mark the scenario as the new baseline. Persisting it is the
    /// orchestrator's job.
    pub fn into_applied(mut self) -> (ClusterSnapshot, WithdrawalDiff) {
        self.diff.state = ScenarioState::Applied;
        (self.scenario, self.diff)
    }
}

/// Build the withdrawal scenario for `project_id` against `baseline`.
pub fn simulate(
    baseline: &ClusterSnapshot,
    project_id: &str,
    config: &EngineConfig,
) -> EngineResult<WithdrawalScenario> {
    let key = baseline.key().clone();
    let withdrawing = baseline
        .project(project_id)
        .filter(|p| p.is_active())
        .ok_or_else(|| EngineError::ProjectNotFound {
            key: key.clone(),
            project_id: project_id.to_string(),
        })?;

    let mut warnings = WarningLog::new();
    let ledger = ledger::resolve(baseline, config.allocation_epsilon, &mut warnings);

    let held: Vec<&str> = ledger
        .links
        .iter()
        .filter(|l| l.project_id == project_id && l.is_cost_allocated())
        .map(|l| l.upgrade_id.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if held.is_empty() {
        log::info!("{key}: {project_id} holds no cost-allocated upgrades; withdrawal is a no-op");
        let diff = WithdrawalDiff::noop(key, project_id.to_string(), warnings.into_vec());
        let scenario = build_scenario(baseline, project_id, &[]);
        return Ok(WithdrawalScenario { scenario, diff });
    }

    let mut reallocations = Vec::with_capacity(held.len());
    for upgrade_id in held {
        let links = ledger.cost_links_for_upgrade(upgrade_id);
        let upgrade = ledger.upgrades.get(upgrade_id).copied();
        let allocated_sum: f64 = links.iter().filter_map(|l| l.allocated_cost).sum();
        let cost_basis = upgrade
            .and_then(|u| u.total_cost)
            .filter(|t| *t > 0.0)
            .unwrap_or(allocated_sum);

        let (mine, remaining): (Vec<_>, Vec<_>) =
            links.into_iter().partition(|l| l.project_id == project_id);
        // Share of one link, falling back to its slice of the cost basis.
        let share = |l: &ProjectUpgradeLink| {
            ledger.share_of(l).or_else(|| {
                l.allocated_cost
                    .filter(|_| cost_basis > 0.0)
                    .map(|c| c / cost_basis)
            })
        };
        let withdrawn_share = mine.iter().filter_map(|l| share(*l)).reduce(|a, b| a + b);
        let withdrawn_cost: f64 = mine
            .iter()
            .map(|l| {
                l.allocated_cost
                    .or_else(|| share(*l).map(|s| s * cost_basis))
                    .unwrap_or(0.0)
            })
            .sum();

        // One entry per remaining holder; duplicate rows are folded together.
        let mut shares: Vec<(ProjectId, f64, Option<f64>)> = Vec::with_capacity(remaining.len());
        for l in &remaining {
            let s = share(*l).unwrap_or(0.0);
            match shares.iter_mut().find(|(id, _, _)| *id == l.project_id) {
                Some((_, total, cost)) => {
                    *total += s;
                    *cost = add_opt(*cost, l.allocated_cost);
                }
                None => shares.push((l.project_id.clone(), s, l.allocated_cost)),
            }
        }
        let remaining_share: f64 = shares.iter().map(|(_, s, _)| s).sum();

        let reallocation = if remaining_share <= config.allocation_epsilon {
            UpgradeReallocation {
                upgrade_id: upgrade_id.to_string(),
                withdrawn_share,
                withdrawn_cost,
                cost_basis,
                links: shares
                    .into_iter()
                    .map(|(project_id, share, cost)| LinkReallocation {
                        project_id,
                        old_share: share,
                        new_share: share,
                        old_cost: cost,
                        new_cost: cost.unwrap_or(0.0),
                    })
                    .collect(),
                unallocated_cost: Some(withdrawn_cost),
            }
        } else {
            UpgradeReallocation {
                upgrade_id: upgrade_id.to_string(),
                withdrawn_share,
                withdrawn_cost,
                cost_basis,
                links: shares
                    .into_iter()
                    .map(|(project_id, share, cost)| {
                        let new_share = share / remaining_share;
                        LinkReallocation {
                            project_id,
                            old_share: share,
                            new_share,
                            old_cost: cost,
                            new_cost: new_share * cost_basis,
                        }
                    })
                    .collect(),
                unallocated_cost: None,
            }
        };

        if !reallocation.is_unallocated()
            && (reallocation.new_share_total() - 1.0).abs() > config.allocation_epsilon
        {
            return Err(EngineError::InvariantViolation {
                key,
                detail: format!(
                    "redistributed shares for {upgrade_id} sum to {}",
                    reallocation.new_share_total()
                ),
            });
        }
        if reallocation.is_unallocated() {
            log::info!(
                "{key}: {upgrade_id} left fully unallocated ({:.0} unassigned)",
                reallocation.withdrawn_cost
            );
        }
        reallocations.push(reallocation);
    }

    let scenario = build_scenario(baseline, project_id, &reallocations);

    // Projects that shared any counted upgrade with the withdrawer, plus
    // every project that received a reallocation.
    let before = scoring::score_snapshot(baseline, config)?;
    let mut affected_ids: BTreeSet<ProjectId> = before
        .project(project_id)
        .map(|s| s.codependent_project_ids.iter().cloned().collect())
        .unwrap_or_default();
    for r in &reallocations {
        affected_ids.extend(r.links.iter().map(|l| l.project_id.clone()));
    }

    let after = scoring::score_snapshot(&scenario, config)?;
    let mut deltas: BTreeMap<&str, f64> = BTreeMap::new();
    for r in reallocations.iter().filter(|r| !r.is_unallocated()) {
        for l in &r.links {
            *deltas.entry(l.project_id.as_str()).or_default() +=
                l.new_cost - l.old_cost.unwrap_or(0.0);
        }
    }
    let affected = affected_ids
        .iter()
        .filter_map(|id| {
            let b = before.project(id)?;
            let a = after.project(id)?;
            Some(ProjectImpact {
                project_id: id.clone(),
                cost_delta: deltas.get(id.as_str()).copied().unwrap_or(0.0),
                before: b.into(),
                after: a.into(),
            })
        })
        .collect();

    let overloads = overload_impacts(baseline, project_id);
    log::info!(
        "{key}: simulated withdrawal of {} ({} upgrades, {} affected projects)",
        withdrawing.project_id,
        reallocations.len(),
        affected_ids.len()
    );

    Ok(WithdrawalScenario {
        scenario,
        diff: WithdrawalDiff {
            key,
            withdrawn_project_id: project_id.to_string(),
            state: ScenarioState::Proposed,
            upgrades: reallocations,
            affected,
            overloads,
            warnings: warnings.into_vec(),
        },
    })
}

/// Apply the reallocations to a copy of the baseline ledger. A holder
/// with several rows on one upgrade keeps a single merged row.
fn build_scenario(
    baseline: &ClusterSnapshot,
    project_id: &str,
    reallocations: &[UpgradeReallocation],
) -> ClusterSnapshot {
    let mut scenario = baseline.clone();
    let by_upgrade: BTreeMap<&str, &UpgradeReallocation> = reallocations
        .iter()
        .filter(|r| !r.is_unallocated())
        .map(|r| (r.upgrade_id.as_str(), r))
        .collect();

    let mut deltas: BTreeMap<ProjectId, f64> = BTreeMap::new();
    let mut links: Vec<ProjectUpgradeLink> = Vec::with_capacity(baseline.links.len());
    for mut link in baseline.links.iter().filter(|l| l.project_id != project_id).cloned() {
        let new = by_upgrade
            .get(link.upgrade_id.as_str())
            .filter(|_| link.is_cost_allocated())
            .and_then(|r| r.links.iter().find(|n| n.project_id == link.project_id));
        let Some(new) = new else {
            links.push(link);
            continue;
        };
        let merged = links.iter_mut().find(|l| {
            l.is_cost_allocated() && l.upgrade_id == link.upgrade_id && l.project_id == link.project_id
        });
        if let Some(first) = merged {
            first.mw_impact = add_opt(first.mw_impact, link.mw_impact);
            continue;
        }
        *deltas.entry(link.project_id.clone()).or_default() +=
            new.new_cost - new.old_cost.unwrap_or(0.0);
        link.percent_allocation = Some(new.new_share);
        link.allocated_cost = Some(new.new_cost);
        links.push(link);
    }
    scenario.links = links;

    for project in scenario.projects.iter_mut() {
        if project.project_id == project_id {
            project.status = ProjectStatus::Withdrawn;
        } else if let Some(delta) = deltas.get(&project.project_id) {
            project.total_cost = project.total_cost.map(|c| c + delta);
        }
    }
    for overload in scenario.overloads.iter_mut() {
        let removed = overload.contribution_of(project_id);
        if removed > 0.0 && overload.rating_mva > 0.0 {
            overload.loading_pct -= removed / overload.rating_mva * 100.0;
        }
        overload.contributions.retain(|c| c.project_id != project_id);
    }
    scenario
}

fn add_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

fn overload_impacts(baseline: &ClusterSnapshot, project_id: &str) -> Vec<OverloadImpact> {
    baseline
        .overloads
        .iter()
        .filter_map(|o| {
            let mw = o.contribution_of(project_id);
            if mw <= 0.0 {
                return None;
            }
            let after = (o.rating_mva > 0.0).then(|| o.loading_pct - mw / o.rating_mva * 100.0);
            Some(OverloadImpact {
                overload_id: o.overload_id.clone(),
                facility_name: o.facility_name.clone(),
                withdrawn_mw: mw,
                loading_pct_before: o.loading_pct,
                loading_pct_after: after,
                relieved: o.loading_pct > 100.0 && after.is_some_and(|a| a <= 100.0),
            })
        })
        .collect()
}
