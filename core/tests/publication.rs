//! Store and orchestration tests: ingestion, atomic publication, the read
//! API, cancellation, failed runs, and applied withdrawals.

use queuerisk_core::{
    config::EngineConfig,
    engine::ScoringEngine,
    error::EngineError,
    lock::CancelToken,
    model::{
        ClusterSnapshot, FacilityOverload, LinkType, MwContribution, Project, ProjectStatus,
        ProjectUpgradeLink, Upgrade,
    },
    report::RunStatus,
    repository::ClusterRepository,
    risk::RiskComponent,
    store::ScoreStore,
    types::ClusterKey,
    withdrawal::ScenarioState,
};

fn key() -> ClusterKey {
    ClusterKey::new("AG1", "Phase 1")
}

fn project(id: &str, mw: Option<f64>, total_cost: f64) -> Project {
    Project {
        mw_capacity: mw,
        total_cost: Some(total_cost),
        developer: Some("Summit Ridge Energy".into()),
        ..Project::new(id)
    }
}

fn cost_link(project: &str, upgrade: &str, share: f64, cost: f64) -> ProjectUpgradeLink {
    ProjectUpgradeLink {
        project_id: project.into(),
        upgrade_id: upgrade.into(),
        link_type: LinkType::CostAllocated,
        percent_allocation: Some(share),
        allocated_cost: Some(cost),
        mw_impact: Some(12.5),
    }
}

/// Projects and links sorted the way the store returns them.
fn fixture() -> ClusterSnapshot {
    let mut snapshot = ClusterSnapshot::empty(key());
    snapshot.cluster.decision_deadline = chrono::NaiveDate::from_ymd_opt(2027, 3, 31);
    snapshot.projects = vec![
        project("A", Some(100.0), 10_000_000.0),
        project("B", Some(50.0), 10_000_000.0),
        project("C", Some(200.0), 7_000_000.0),
        project("D", None, 3_000_000.0),
    ];
    snapshot.upgrades = vec![
        Upgrade {
            upgrade_id: "U1".into(),
            title: Some("Rebuild Keeney - Red Lion 230 kV".into()),
            total_cost: Some(10_000_000.0),
            ..Upgrade::default()
        },
        Upgrade { upgrade_id: "U2".into(), total_cost: Some(4_000_000.0), ..Upgrade::default() },
    ];
    snapshot.links = vec![
        cost_link("A", "U1", 0.6, 6_000_000.0),
        cost_link("B", "U1", 0.4, 4_000_000.0),
        ProjectUpgradeLink {
            link_type: LinkType::TaggedNoCost,
            percent_allocation: None,
            allocated_cost: None,
            mw_impact: None,
            ..cost_link("D", "U1", 0.0, 0.0)
        },
        cost_link("B", "U2", 0.5, 2_000_000.0),
        cost_link("C", "U2", 0.5, 2_000_000.0),
    ];
    snapshot.overloads = vec![FacilityOverload {
        overload_id: "OL-1".into(),
        facility_name: "Keeney - Red Lion 230 kV".into(),
        contingency_name: Some("CTG-101".into()),
        loading_pct: 104.0,
        rating_mva: 500.0,
        contributions: vec![MwContribution {
            project_id: "A".into(),
            mw_contribution: 30.0,
            contribution_type: Some("Generator Deliverability".into()),
        }],
        ..FacilityOverload::default()
    }];
    snapshot
}

fn engine_with(snapshot: &ClusterSnapshot) -> ScoringEngine<ScoreStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = ScoreStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    let mut engine = ScoringEngine::new(store, EngineConfig::default());
    engine.repository_mut().ingest_snapshot(snapshot).expect("ingest");
    engine
}

/// What goes in comes back out unchanged.
#[test]
fn ingested_snapshot_loads_back() {
    let snapshot = fixture();
    let engine = engine_with(&snapshot);
    let loaded = engine.repository().load_snapshot(&key()).unwrap();
    assert_eq!(loaded, snapshot);
    assert_eq!(engine.repository().list_clusters().unwrap(), vec![key()]);
}

/// Re-ingesting replaces the cluster's records instead of appending.
#[test]
fn reingest_replaces_records() {
    let mut snapshot = fixture();
    let mut engine = engine_with(&snapshot);
    snapshot.projects.pop();
    snapshot.links.retain(|l| l.project_id != "D");
    engine.repository_mut().ingest_snapshot(&snapshot).unwrap();
    let loaded = engine.repository().load_snapshot(&key()).unwrap();
    assert_eq!(loaded.projects.len(), 3);
    assert_eq!(loaded.links.len(), 4);
}

/// A completed run is visible through every read path.
#[test]
fn score_cluster_publishes_views() {
    let mut engine = engine_with(&fixture());
    let report = engine.score_cluster(&key(), &CancelToken::new()).unwrap();
    assert_eq!(report.status, RunStatus::Published);
    assert_eq!(report.project_count, 4);

    let repo = engine.repository();
    assert_eq!(repo.published_run(&key()).unwrap(), Some(report.run_id.clone()));

    let views = repo.published_scores(&key()).unwrap();
    assert_eq!(views.len(), 4);
    assert!(views.iter().all(|v| v.run_id == report.run_id));

    let a = repo.project_risk(&key(), "A").unwrap().unwrap();
    assert_eq!(a.cost_rank, Some(2));
    assert_eq!(a.codependent_project_ids, vec!["B", "D"]);
    assert_eq!(a.overload_exposure, 1);
    assert!(a.risk_level.is_some());

    let d = repo.project_risk(&key(), "D").unwrap().unwrap();
    assert_eq!(d.unknown_components, vec![RiskComponent::Cost]);
    assert!(d.risk_score_overall.is_some());

    assert!(repo.project_risk(&key(), "ZZZ").unwrap().is_none());

    let stored = repo.run_report(&report.run_id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Published);
    assert_eq!(stored.project_count, 4);
    assert_eq!(stored.warnings, report.warnings);
}

/// Derived upgrade counts and cluster totals are refreshed on publish.
#[test]
fn publish_refreshes_derived_totals() {
    let mut engine = engine_with(&fixture());
    engine.score_cluster(&key(), &CancelToken::new()).unwrap();
    let loaded = engine.repository().load_snapshot(&key()).unwrap();
    let u1 = loaded.upgrades.iter().find(|u| u.upgrade_id == "U1").unwrap();
    assert_eq!(u1.shared_by_count, Some(2));
    assert_eq!(loaded.cluster.total_projects, Some(4));
    assert_eq!(loaded.cluster.total_mw, Some(350.0));
}

/// A second run swaps the pointer; readers only ever see one run.
#[test]
fn rescoring_moves_the_publication_pointer() {
    let mut engine = engine_with(&fixture());
    let cancel = CancelToken::new();
    let first = engine.score_cluster(&key(), &cancel).unwrap();
    let second = engine.score_cluster(&key(), &cancel).unwrap();
    assert_ne!(first.run_id, second.run_id);

    let repo = engine.repository();
    assert_eq!(repo.published_run(&key()).unwrap(), Some(second.run_id.clone()));
    let views = repo.published_scores(&key()).unwrap();
    assert_eq!(views.len(), 4);
    assert!(views.iter().all(|v| v.run_id == second.run_id));
    // History survives even though the old rows are gone.
    assert!(repo.run_report(&first.run_id).unwrap().is_some());
}

/// A cancelled unit writes nothing.
#[test]
fn cancelled_run_publishes_nothing() {
    let mut engine = engine_with(&fixture());
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine.score_cluster(&key(), &cancel).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }), "got {err}");
    assert_eq!(engine.repository().published_run(&key()).unwrap(), None);
    assert!(engine.repository().published_scores(&key()).unwrap().is_empty());
}

/// A run that aborts leaves the previous publication in place.
#[test]
fn failed_run_keeps_previous_publication() {
    let mut snapshot = fixture();
    let mut engine = engine_with(&snapshot);
    let good = engine.score_cluster(&key(), &CancelToken::new()).unwrap();

    snapshot.projects[1].total_cost = Some(-1.0);
    engine.repository_mut().ingest_snapshot(&snapshot).unwrap();
    let err = engine.score_cluster(&key(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }), "got {err}");

    let repo = engine.repository();
    assert_eq!(repo.published_run(&key()).unwrap(), Some(good.run_id.clone()));
    let b = repo.project_risk(&key(), "B").unwrap().unwrap();
    assert_eq!(b.total_cost, Some(10_000_000.0));
}

/// Scoring a cluster that was never ingested is an error, not an empty run.
#[test]
fn unknown_cluster_is_reported() {
    let mut engine = engine_with(&fixture());
    let missing = ClusterKey::new("AG9", "Phase 1");
    let err = engine.score_cluster(&missing, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EngineError::ClusterNotFound { .. }), "got {err}");
    assert!(engine.repository().cluster_summary(&missing).is_err());
}

/// Summary statistics are computed over the published run only.
#[test]
fn cluster_summary_reflects_published_run() {
    let mut engine = engine_with(&fixture());
    let before = engine.repository().cluster_summary(&key()).unwrap();
    assert_eq!(before.run_id, None);
    assert!(before.risk_distribution.is_empty());

    let report = engine.score_cluster(&key(), &CancelToken::new()).unwrap();
    let summary = engine.repository().cluster_summary(&key()).unwrap();
    assert_eq!(summary.run_id, Some(report.run_id));
    assert_eq!(summary.total_projects, 4);
    assert_eq!(summary.total_cost, Some(30_000_000.0));
    assert_eq!(summary.risk_distribution.values().sum::<i64>(), 4);
    // D has no capacity, so only three projects carry a percentile.
    assert_eq!(summary.cost_distribution.values().sum::<i64>(), 3);
    assert_eq!(summary.cost_distribution.get("q1"), Some(&1));
    assert_eq!(summary.cost_distribution.get("q3"), Some(&1));
    assert_eq!(summary.cost_distribution.get("q5"), Some(&1));

    let expected_avg = (100.0 + 200.0 + 35.0) / 3.0;
    assert!((summary.avg_cost_per_kw.unwrap() - expected_avg).abs() < 1e-9);
    assert!(summary.component_averages.dependency.is_some());
}

/// Histogram bins are $100/kW wide.
#[test]
fn cost_histogram_bins_published_costs() {
    let mut engine = engine_with(&fixture());
    engine.score_cluster(&key(), &CancelToken::new()).unwrap();
    let histogram = engine.cost_histogram(&key()).unwrap();
    assert_eq!(histogram.total_projects, 3);
    assert_eq!(histogram.labels.len(), 2);
    // 35 -> first bin; 100 and 200 -> last bin (200 folds into the top).
    assert_eq!(histogram.counts, vec![1, 2]);
}

/// Simulation reads the ledger but never writes it.
#[test]
fn simulation_does_not_touch_publication() {
    let mut engine = engine_with(&fixture());
    let report = engine.score_cluster(&key(), &CancelToken::new()).unwrap();
    let diff = engine.simulate_withdrawal(&key(), "A").unwrap();
    assert_eq!(diff.state, ScenarioState::Proposed);
    assert_eq!(diff.affected_project_ids(), vec!["B", "D"]);

    let repo = engine.repository();
    assert_eq!(repo.published_run(&key()).unwrap(), Some(report.run_id));
    let loaded = repo.load_snapshot(&key()).unwrap();
    assert_eq!(loaded.project("A").unwrap().status, ProjectStatus::Active);
}

/// Applying a withdrawal rewrites the ledger and republishes in one go.
#[test]
fn applied_withdrawal_becomes_the_baseline() {
    let mut engine = engine_with(&fixture());
    let cancel = CancelToken::new();
    engine.score_cluster(&key(), &cancel).unwrap();

    let (diff, report) = engine.apply_withdrawal(&key(), "A", &cancel).unwrap();
    assert_eq!(diff.state, ScenarioState::Applied);
    assert_eq!(report.status, RunStatus::Published);
    assert_eq!(report.project_count, 3);

    let repo = engine.repository();
    assert_eq!(repo.published_run(&key()).unwrap(), Some(report.run_id));
    assert!(repo.project_risk(&key(), "A").unwrap().is_none());
    let b = repo.project_risk(&key(), "B").unwrap().unwrap();
    assert_eq!(b.total_cost, Some(16_000_000.0));

    let loaded = repo.load_snapshot(&key()).unwrap();
    assert_eq!(loaded.project("A").unwrap().status, ProjectStatus::Withdrawn);
    assert!(loaded.links.iter().all(|l| l.project_id != "A"));
    let b_u1 = loaded
        .links
        .iter()
        .find(|l| l.project_id == "B" && l.upgrade_id == "U1")
        .unwrap();
    assert_eq!(b_u1.percent_allocation, Some(1.0));
    let u1 = loaded.upgrades.iter().find(|u| u.upgrade_id == "U1").unwrap();
    assert_eq!(u1.shared_by_count, Some(1));
    assert!((loaded.overloads[0].loading_pct - 98.0).abs() < 1e-9);

    // A second withdrawal of the same project is rejected.
    let err = engine.apply_withdrawal(&key(), "A", &cancel).unwrap_err();
    assert!(matches!(err, EngineError::ProjectNotFound { .. }), "got {err}");
}
