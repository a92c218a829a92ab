//! Scoring pass integration tests: composition, ranking, co-dependency,
//! data-quality warnings, and the invariant checks that block publication.

use queuerisk_core::{
    config::{CodependencyPolicy, EngineConfig},
    error::EngineError,
    model::{ClusterSnapshot, LinkType, Project, ProjectStatus, ProjectUpgradeLink, Upgrade},
    risk::{RiskComponent, RiskLevel},
    scoring::score_snapshot,
    types::ClusterKey,
    warning::{DataQualityWarning, MissingSide},
};

const TOL: f64 = 1e-9;

fn project(id: &str, mw: Option<f64>, total_cost: Option<f64>) -> Project {
    Project { mw_capacity: mw, total_cost, ..Project::new(id) }
}

fn upgrade(id: &str, total_cost: f64) -> Upgrade {
    Upgrade { upgrade_id: id.into(), total_cost: Some(total_cost), ..Upgrade::default() }
}

fn cost_link(project: &str, upgrade: &str, share: f64, cost: f64) -> ProjectUpgradeLink {
    ProjectUpgradeLink {
        project_id: project.into(),
        upgrade_id: upgrade.into(),
        link_type: LinkType::CostAllocated,
        percent_allocation: Some(share),
        allocated_cost: Some(cost),
        mw_impact: None,
    }
}

fn tagged_link(project: &str, upgrade: &str) -> ProjectUpgradeLink {
    ProjectUpgradeLink {
        project_id: project.into(),
        upgrade_id: upgrade.into(),
        link_type: LinkType::TaggedNoCost,
        percent_allocation: None,
        allocated_cost: None,
        mw_impact: None,
    }
}

/// Four active projects and one withdrawn one.
///
/// U1 ($10M): A 60%, B 40%, D tagged.  U2 ($4M): B 50%, C 50%.
/// $/kW: A 100, B 200, C 25, D unknown (no capacity).
fn fixture() -> ClusterSnapshot {
    let mut snapshot = ClusterSnapshot::empty(ClusterKey::new("AG1", "Phase 1"));
    snapshot.projects = vec![
        project("A", Some(100.0), Some(10_000_000.0)),
        project("B", Some(50.0), Some(10_000_000.0)),
        project("C", Some(200.0), Some(5_000_000.0)),
        project("D", None, Some(3_000_000.0)),
        Project { status: ProjectStatus::Withdrawn, ..project("E", Some(80.0), Some(1_000_000.0)) },
    ];
    snapshot.upgrades = vec![upgrade("U1", 10_000_000.0), upgrade("U2", 4_000_000.0)];
    snapshot.links = vec![
        cost_link("A", "U1", 0.6, 6_000_000.0),
        cost_link("B", "U1", 0.4, 4_000_000.0),
        tagged_link("D", "U1"),
        cost_link("B", "U2", 0.5, 2_000_000.0),
        cost_link("C", "U2", 0.5, 2_000_000.0),
        cost_link("E", "U2", 0.1, 400_000.0),
    ];
    snapshot
}

/// With every component known, overall is exactly the documented weighted sum.
#[test]
fn overall_is_weighted_sum_when_all_components_known() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    let a = scored.project("A").unwrap();

    assert_eq!(a.components.cost, Some(50.0));
    assert!((a.components.concentration.unwrap() - 60.0).abs() < TOL);
    assert!((a.components.dependency.unwrap() - 200.0 / 3.0).abs() < TOL);
    assert_eq!(a.components.timeline, Some(0.0));

    let expected = 0.35 * 50.0 + 0.25 * 60.0 + 0.25 * (200.0 / 3.0) + 0.15 * 0.0;
    assert!((a.risk_score_overall.unwrap() - expected).abs() < TOL);
    assert!(a.unknown_components.is_empty());
    assert_eq!(a.risk_level, Some(RiskLevel::Medium));
}

/// A project with no capacity has an unknown cost component; the other
/// weights are renormalised instead of treating it as zero.
#[test]
fn unknown_capacity_reweights_remaining_components() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    let d = scored.project("D").unwrap();

    assert_eq!(d.cost_per_kw, None);
    assert_eq!(d.cost_rank, None);
    assert_eq!(d.cost_percentile, None);
    assert_eq!(d.components.cost, None);
    assert_eq!(d.unknown_components, vec![RiskComponent::Cost]);

    let expected = (0.25 * 0.0 + 0.25 * (200.0 / 3.0) + 0.15 * 100.0) / 0.65;
    let overall = d.risk_score_overall.unwrap();
    assert!((overall - expected).abs() < TOL, "overall {overall}, expected {expected}");
}

/// Ranks follow ascending cost-per-kW, starting at 1.
#[test]
fn ranks_follow_sorted_cost() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    assert_eq!(scored.project("C").unwrap().cost_rank, Some(1));
    assert_eq!(scored.project("A").unwrap().cost_rank, Some(2));
    assert_eq!(scored.project("B").unwrap().cost_rank, Some(3));
    assert_eq!(scored.project("C").unwrap().cost_percentile, Some(0.0));
    assert_eq!(scored.project("A").unwrap().cost_percentile, Some(50.0));
    assert_eq!(scored.project("B").unwrap().cost_percentile, Some(100.0));
}

/// Ties share a rank and the next distinct value skips ("1224").
#[test]
fn tied_costs_share_competition_rank() {
    let mut snapshot = ClusterSnapshot::empty(ClusterKey::new("AG2", "Phase 2"));
    snapshot.projects = vec![
        project("P1", Some(100.0), Some(1_000_000.0)), // 10 $/kW
        project("P2", Some(100.0), Some(2_000_000.0)), // 20
        project("P3", Some(50.0), Some(1_000_000.0)),  // 20
        project("P4", Some(100.0), Some(3_000_000.0)), // 30
    ];
    let scored = score_snapshot(&snapshot, &EngineConfig::default()).unwrap();
    let ranks: Vec<Option<u32>> = ["P1", "P2", "P3", "P4"]
        .iter()
        .map(|id| scored.project(id).unwrap().cost_rank)
        .collect();
    assert_eq!(ranks, vec![Some(1), Some(2), Some(2), Some(4)]);

    // Tied projects also share the average-rank cost score.
    let p2 = scored.project("P2").unwrap().components.cost.unwrap();
    let p3 = scored.project("P3").unwrap().components.cost.unwrap();
    assert!((p2 - 50.0).abs() < TOL);
    assert!((p3 - 50.0).abs() < TOL);
}

/// Co-dependency is symmetric and never self-referential.
#[test]
fn codependency_is_symmetric() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    for (id, p) in &scored.projects {
        assert!(!p.codependent_project_ids.contains(id), "{id} lists itself");
        for other in &p.codependent_project_ids {
            let back = &scored.project(other).unwrap().codependent_project_ids;
            assert!(back.contains(id), "{other} does not list {id}");
        }
    }
    assert_eq!(scored.project("B").unwrap().codependent_project_ids, vec!["A", "C", "D"]);
}

/// Restricting the graph to paying links drops tagged co-dependents.
#[test]
fn tagged_links_can_be_excluded_from_graph() {
    let config = EngineConfig {
        codependency: CodependencyPolicy::cost_allocated_only(),
        ..EngineConfig::default()
    };
    let scored = score_snapshot(&fixture(), &config).unwrap();
    assert!(scored.project("D").unwrap().codependent_project_ids.is_empty());
    assert_eq!(scored.project("A").unwrap().codependent_project_ids, vec!["B"]);
    // Timeline still counts the tag itself.
    assert_eq!(scored.project("D").unwrap().components.timeline, Some(100.0));
}

/// Withdrawn projects are outside the population and their links are ignored.
#[test]
fn withdrawn_projects_are_not_scored() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    assert!(scored.project("E").is_none());
    assert_eq!(scored.total_projects, 4);
    assert_eq!(scored.shared_by_counts.get("U2"), Some(&2));
    assert!((scored.total_mw - 350.0).abs() < TOL);
}

/// Same snapshot, same config: identical output.
#[test]
fn scoring_is_idempotent() {
    let config = EngineConfig::default();
    let first = score_snapshot(&fixture(), &config).unwrap();
    let second = score_snapshot(&fixture(), &config).unwrap();
    assert_eq!(first, second);
}

/// Every score stays inside [0, 100].
#[test]
fn scores_stay_in_range() {
    let scored = score_snapshot(&fixture(), &EngineConfig::default()).unwrap();
    for p in scored.projects.values() {
        let values = [
            p.components.cost,
            p.components.concentration,
            p.components.dependency,
            p.components.timeline,
            p.risk_score_overall,
            p.cost_percentile,
        ];
        for v in values.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v), "{}: {v} out of range", p.project_id);
        }
    }
}

/// Bad rows produce warnings and the run still completes.
#[test]
fn data_quality_problems_are_warnings() {
    let mut snapshot = fixture();
    snapshot.projects.push(project("Z", Some(0.0), Some(1_000_000.0)));
    snapshot.links.push(cost_link("GHOST", "U1", 0.2, 2_000_000.0));
    snapshot.links.push(cost_link("A", "U404", 0.2, 1.0));
    snapshot.links.push(cost_link("C", "U1", 0.3, 3_000_000.0));

    let scored = score_snapshot(&snapshot, &EngineConfig::default()).unwrap();
    let w = &scored.warnings;
    assert!(w.contains(&DataQualityWarning::NonPositiveCapacity {
        project_id: "Z".into(),
        mw_capacity: 0.0,
    }));
    assert!(w.contains(&DataQualityWarning::DanglingLink {
        project_id: "GHOST".into(),
        upgrade_id: "U1".into(),
        missing: MissingSide::Project,
    }));
    assert!(w.contains(&DataQualityWarning::DanglingLink {
        project_id: "A".into(),
        upgrade_id: "U404".into(),
        missing: MissingSide::Upgrade,
    }));
    assert!(w.iter().any(|w| matches!(
        w,
        DataQualityWarning::AllocationOverflow { upgrade_id, total_share }
            if upgrade_id == "U1" && (*total_share - 1.3).abs() < 1e-9
    )));

    let z = scored.project("Z").unwrap();
    assert_eq!(z.cost_per_kw, None);
    assert!(z.unknown_components.contains(&RiskComponent::Cost));
}

/// A paying link with neither a percentage nor a derivable share is flagged.
#[test]
fn missing_share_is_flagged() {
    let mut snapshot = fixture();
    snapshot.upgrades.push(Upgrade { upgrade_id: "U3".into(), ..Upgrade::default() });
    snapshot.links.push(ProjectUpgradeLink {
        percent_allocation: None,
        allocated_cost: Some(500_000.0),
        ..cost_link("C", "U3", 0.0, 0.0)
    });
    let scored = score_snapshot(&snapshot, &EngineConfig::default()).unwrap();
    assert!(scored.warnings.contains(&DataQualityWarning::MissingAllocationShare {
        project_id: "C".into(),
        upgrade_id: "U3".into(),
    }));
}

/// Negative costs abort the whole unit instead of producing a score.
#[test]
fn negative_cost_is_a_batch_abort() {
    let mut snapshot = fixture();
    snapshot.projects[0].total_cost = Some(-5.0);
    let err = score_snapshot(&snapshot, &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }), "got {err}");
}

/// A project with no links at all gets zero for the graph-based components.
#[test]
fn isolated_project_scores_zero_exposure() {
    let mut snapshot = fixture();
    snapshot.projects.push(project("LONE", Some(10.0), Some(400_000.0)));
    let scored = score_snapshot(&snapshot, &EngineConfig::default()).unwrap();
    let lone = scored.project("LONE").unwrap();
    assert_eq!(lone.components.concentration, Some(0.0));
    assert_eq!(lone.components.dependency, Some(0.0));
    assert_eq!(lone.components.timeline, Some(0.0));
    assert!(lone.codependent_project_ids.is_empty());
}
