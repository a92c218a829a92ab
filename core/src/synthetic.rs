//! Deterministic synthetic clusters for demos and load tests.
//!
//! Same seed, same snapshot. The generator deliberately includes the
//! messy corners real study reports have: unknown capacities, zero-MW
//! rows, tagged-only links, and shares that must be derived from cost.

use crate::{
    model::{
        Cluster, ClusterSnapshot, FacilityOverload, LinkType, MwContribution, Project,
        ProjectStatus, ProjectUpgradeLink, Upgrade,
    },
    rng::{SeededRng, Stream},
    types::ClusterKey,
};
use chrono::NaiveDate;

const DEVELOPERS: &[&str] = &[
    "Summit Ridge Energy", "Blue Heron Solar", "Catoctin Wind", "Ironbridge Storage",
    "Laurel Valley Power", "Tidewater Renewables", "Keystone Grid Partners", "Allegheny Sun",
];
const UTILITIES: &[&str] = &["PECO", "PPL", "BGE", "Dominion", "PSEG", "AEP", "ComEd"];
const STATES: &[&str] = &["PA", "MD", "VA", "NJ", "OH", "IL", "DE"];
const FUEL_TYPES: &[&str] = &["Solar", "Wind", "Storage", "Solar; Storage", "Natural Gas"];
const FACILITIES: &[&str] = &[
    "Peach Bottom - Conastone 500 kV", "Brunner Island - Yorkana 230 kV",
    "Keeney - Red Lion 230 kV", "Doubs - Mount Storm 500 kV", "Cabot - Harwick 138 kV",
];
const CONTINGENCY_TYPES: &[&str] = &["Single", "Breaker", "Tower", "Bus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticSpec {
    pub projects: usize,
    pub upgrades: usize,
    pub seed:     u64,
}

impl SyntheticSpec {
    /// Roughly one upgrade per two projects, as in published cluster studies.
    pub fn with_projects(projects: usize, seed: u64) -> Self {
        Self { projects, upgrades: (projects / 2).max(1), seed }
    }
}

pub fn generate(key: ClusterKey, spec: SyntheticSpec) -> ClusterSnapshot {
    let mut snapshot = ClusterSnapshot::empty(key);
    if spec.projects == 0 {
        snapshot.cluster.total_projects = Some(0);
        return snapshot;
    }

    snapshot.projects = generate_projects(spec);
    snapshot.upgrades = generate_upgrades(spec);
    snapshot.links = generate_links(spec, &snapshot.projects, &snapshot.upgrades);
    snapshot.overloads = generate_overloads(spec, &snapshot.projects);

    // Project totals: allocated network costs plus local interconnection work.
    let mut rng = SeededRng::new(spec.seed, Stream::Costs);
    for project in &mut snapshot.projects {
        let network: f64 = snapshot
            .links
            .iter()
            .filter(|l| l.project_id == project.project_id)
            .filter_map(|l| l.allocated_cost)
            .sum();
        let toif = rng.uniform(250_000.0, 4_000_000.0);
        let stand_alone = rng.uniform(0.0, 2_000_000.0);
        project.toif_cost = Some(round_dollars(toif));
        project.stand_alone_cost = Some(round_dollars(stand_alone));
        project.network_upgrade_cost = Some(round_dollars(network));
        project.total_cost = if rng.chance(0.03) {
            None
        } else {
            Some(round_dollars(network + toif + stand_alone))
        };
        project.rd1_amount = project.mw_capacity.map(|mw| round_dollars(mw.max(0.0) * 4_000.0));
    }

    snapshot.cluster = Cluster {
        key: snapshot.cluster.key.clone(),
        total_projects: Some(snapshot.projects.len() as i64),
        total_mw: Some(
            snapshot
                .projects
                .iter()
                .filter_map(|p| p.mw_capacity)
                .filter(|mw| *mw > 0.0)
                .sum(),
        ),
        decision_deadline: NaiveDate::from_ymd_opt(2027, 1 + (spec.seed % 12) as u32, 15),
    };
    log::debug!(
        "{}: generated {} projects, {} upgrades, {} links, {} overloads (seed {})",
        snapshot.cluster.key,
        snapshot.projects.len(),
        snapshot.upgrades.len(),
        snapshot.links.len(),
        snapshot.overloads.len(),
        spec.seed
    );
    snapshot
}

fn generate_projects(spec: SyntheticSpec) -> Vec<Project> {
    let mut rng = SeededRng::new(spec.seed, Stream::Projects);
    (0..spec.projects)
        .map(|i| {
            let mw_capacity = if rng.chance(0.05) {
                None
            } else if rng.chance(0.02) {
                Some(0.0)
            } else {
                Some((rng.pareto(20.0, 1.5).min(2_000.0) * 10.0).round() / 10.0)
            };
            Project {
                project_id: format!("AG1-{:03}", i + 1),
                developer: Some(rng.pick(DEVELOPERS).to_string()),
                utility: Some(rng.pick(UTILITIES).to_string()),
                state: Some(rng.pick(STATES).to_string()),
                fuel_type: Some(rng.pick(FUEL_TYPES).to_string()),
                mw_capacity,
                status: ProjectStatus::Active,
                ..Project::default()
            }
        })
        .collect()
}

fn generate_upgrades(spec: SyntheticSpec) -> Vec<Upgrade> {
    let mut rng = SeededRng::new(spec.seed, Stream::Upgrades);
    (0..spec.upgrades)
        .map(|i| Upgrade {
            upgrade_id: format!("n{:04}", 8000 + i),
            utility: Some(rng.pick(UTILITIES).to_string()),
            title: Some(format!("Rebuild {}", rng.pick(FACILITIES))),
            total_cost: Some(round_dollars(rng.pareto(500_000.0, 1.2).min(500_000_000.0))),
            shared_by_count: None,
        })
        .collect()
}

/// Each upgrade gets 1..=6 paying holders whose shares sum to exactly 1,
/// plus up to two tagged projects that pay nothing.
fn generate_links(
    spec: SyntheticSpec,
    projects: &[Project],
    upgrades: &[Upgrade],
) -> Vec<ProjectUpgradeLink> {
    let mut rng = SeededRng::new(spec.seed, Stream::Links);
    let mut links = Vec::new();
    for upgrade in upgrades {
        let total = upgrade.total_cost.unwrap_or(0.0);
        let holders = rng.between(1, 6.min(projects.len()));
        let picked = rng.distinct(projects.len(), holders + 2);
        let (paying, rest) = picked.split_at(holders.min(picked.len()));

        let weights: Vec<f64> = paying.iter().map(|_| rng.uniform(0.1, 1.0)).collect();
        let weight_sum: f64 = weights.iter().sum();
        for (idx, weight) in paying.iter().zip(&weights) {
            let share = weight / weight_sum;
            let project = &projects[*idx];
            links.push(ProjectUpgradeLink {
                project_id: project.project_id.clone(),
                upgrade_id: upgrade.upgrade_id.clone(),
                link_type: LinkType::CostAllocated,
                // Some reports only print the dollar figure.
                percent_allocation: if rng.chance(0.1) { None } else { Some(share) },
                allocated_cost: Some(share * total),
                mw_impact: project.mw_capacity.map(|mw| mw * rng.uniform(0.05, 0.6)),
            });
        }
        for idx in rest {
            if rng.chance(0.5) {
                links.push(ProjectUpgradeLink {
                    project_id: projects[*idx].project_id.clone(),
                    upgrade_id: upgrade.upgrade_id.clone(),
                    link_type: LinkType::TaggedNoCost,
                    percent_allocation: None,
                    allocated_cost: None,
                    mw_impact: None,
                });
            }
        }
    }
    links
}

fn generate_overloads(spec: SyntheticSpec, projects: &[Project]) -> Vec<FacilityOverload> {
    let mut rng = SeededRng::new(spec.seed, Stream::Overloads);
    let count = (spec.upgrades / 3).max(1);
    (0..count)
        .map(|i| {
            let rating_mva = rng.uniform(100.0, 1_200.0).round();
            let contributors = rng.between(1, 4.min(projects.len()));
            let contributions: Vec<MwContribution> = rng
                .distinct(projects.len(), contributors)
                .into_iter()
                .map(|idx| MwContribution {
                    project_id: projects[idx].project_id.clone(),
                    mw_contribution: (rng.uniform(1.0, 60.0) * 10.0).round() / 10.0,
                    contribution_type: Some("Generator Deliverability".to_string()),
                })
                .collect();
            let injected: f64 = contributions.iter().map(|c| c.mw_contribution).sum();
            let loading_pct = rng.uniform(85.0, 110.0) + injected / rating_mva * 100.0;
            FacilityOverload {
                overload_id: format!("OL-{:03}", i + 1),
                facility_name: rng.pick(FACILITIES).to_string(),
                contingency_name: Some(format!("CTG-{}", 100 + i)),
                contingency_type: Some(rng.pick(CONTINGENCY_TYPES).to_string()),
                loading_pct,
                rating_mva,
                mva_to_mitigate: Some(((loading_pct - 100.0).max(0.0) / 100.0) * rating_mva),
                contributions,
            }
        })
        .collect()
}

fn round_dollars(value: f64) -> f64 {
    value.round()
}
