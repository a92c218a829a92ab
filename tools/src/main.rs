//! queuerisk-runner: headless scoring runner.
//!
//! Usage:
//!   queuerisk-runner --synthetic 120 --seed 7 --cluster AG1 --phase "Phase 1"
//!   queuerisk-runner --db queue.db --ingest ag1.json --simulate AG1-042
//!   queuerisk-runner --db queue.db --config weights.json

use anyhow::{Context, Result};
use queuerisk_core::{
    config::EngineConfig,
    engine::ScoringEngine,
    lock::CancelToken,
    model::ClusterSnapshot,
    repository::ClusterRepository,
    store::ScoreStore,
    synthetic::{self, SyntheticSpec},
    types::ClusterKey,
    withdrawal::WithdrawalDiff,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let seed = parse_arg(&args, "--seed", 42u64);
    let synthetic_projects = parse_arg(&args, "--synthetic", 0usize);
    let simulate = flag_value(&args, "--simulate");
    let requested_key = match (flag_value(&args, "--cluster"), flag_value(&args, "--phase")) {
        (Some(name), phase) => Some(ClusterKey::new(name, phase.unwrap_or("Phase 1"))),
        (None, _) => None,
    };

    let config = match flag_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    println!("queuerisk-runner");
    println!("  db:        {db}");
    println!("  workers:   {}", if config.workers == 0 { "auto".to_string() } else { config.workers.to_string() });
    println!();

    let store = if db == ":memory:" {
        ScoreStore::in_memory()?
    } else {
        ScoreStore::open(db)?
    };
    store.migrate()?;
    let mut engine = ScoringEngine::new(store, config);

    let mut ingested: Option<ClusterKey> = None;
    if let Some(path) = flag_value(&args, "--ingest") {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read snapshot {path}"))?;
        let snapshot: ClusterSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Snapshot {path} is not valid JSON"))?;
        log::info!("Ingesting {} from {path}", snapshot.key());
        ingested = Some(snapshot.key().clone());
        engine.repository_mut().ingest_snapshot(&snapshot)?;
    }
    if synthetic_projects > 0 {
        let key = requested_key
            .clone()
            .unwrap_or_else(|| ClusterKey::new("SYN", "Phase 1"));
        log::info!("Generating {synthetic_projects} synthetic projects for {key} (seed {seed})");
        let snapshot = synthetic::generate(key.clone(), SyntheticSpec::with_projects(synthetic_projects, seed));
        engine.repository_mut().ingest_snapshot(&snapshot)?;
        ingested = Some(key);
    }

    let cancel = CancelToken::new();
    let target = requested_key.or(ingested);
    let keys = match &target {
        Some(key) => vec![key.clone()],
        None => engine.repository().list_clusters()?,
    };
    if keys.is_empty() {
        println!("No clusters in {db}. Use --ingest <file> or --synthetic <n>.");
        return Ok(());
    }

    let outcomes = engine.score_all(Some(keys.clone()), &cancel)?;
    println!("=== SCORING RUNS ===");
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "  {:<24} {} ({} projects, {} warnings)",
                outcome.key.to_string(),
                report.status.as_str(),
                report.project_count,
                report.warnings.len()
            ),
            Err(e) => println!("  {:<24} failed: {e}", outcome.key.to_string()),
        }
    }
    println!();

    for key in &keys {
        print_summary(&engine, key)?;
    }

    if let Some(project_id) = simulate {
        let Some(key) = target else {
            anyhow::bail!("--simulate needs --cluster/--phase, --ingest, or --synthetic");
        };
        let diff = engine.simulate_withdrawal(&key, project_id)?;
        print_diff(&diff);
    }

    Ok(())
}

fn print_summary(engine: &ScoringEngine<ScoreStore>, key: &ClusterKey) -> Result<()> {
    let summary = engine.repository().cluster_summary(key)?;
    let histogram = engine.cost_histogram(key)?;

    println!("=== CLUSTER SUMMARY: {key} ===");
    println!("  run_id:          {}", summary.run_id.as_deref().unwrap_or("(unpublished)"));
    println!("  projects:        {}", summary.total_projects);
    println!("  total MW:        {}", fmt_opt(summary.total_mw, 1));
    println!("  total cost:      ${}", fmt_opt(summary.total_cost, 0));
    println!("  avg $/kW:        {}", fmt_opt(summary.avg_cost_per_kw, 2));
    println!("  avg risk score:  {}", fmt_opt(summary.avg_risk_score, 1));
    let levels: Vec<String> = summary
        .risk_distribution
        .iter()
        .map(|(level, n)| format!("{level}={n}"))
        .collect();
    println!("  risk levels:     {}", levels.join(" "));
    let quintiles: Vec<String> = summary
        .cost_distribution
        .iter()
        .map(|(q, n)| format!("{q}={n}"))
        .collect();
    println!("  cost quintiles:  {}", quintiles.join(" "));
    let avg = &summary.component_averages;
    println!(
        "  components:      cost {} | concentration {} | dependency {} | timeline {}",
        fmt_opt(avg.cost, 1),
        fmt_opt(avg.concentration, 1),
        fmt_opt(avg.dependency, 1),
        fmt_opt(avg.timeline, 1)
    );
    println!();

    if histogram.total_projects > 0 {
        println!("  $/kW histogram ({} projects):", histogram.total_projects);
        for (label, count) in histogram.labels.iter().zip(&histogram.counts) {
            if *count > 0 {
                println!("    {label:<12} {count:>4}");
            }
        }
        println!();
    }
    Ok(())
}

fn print_diff(diff: &WithdrawalDiff) {
    println!("=== WITHDRAWAL SIMULATION: {} in {} ===", diff.withdrawn_project_id, diff.key);
    if diff.is_noop() {
        println!("  (no cost-allocated upgrades, nothing to redistribute)");
        return;
    }
    for upgrade in &diff.upgrades {
        let status = if upgrade.is_unallocated() { "UNALLOCATED" } else { "reallocated" };
        println!(
            "  {:<10} ${:>14.0} freed, {} remaining holders, {status}",
            upgrade.upgrade_id,
            upgrade.withdrawn_cost,
            upgrade.links.len()
        );
    }
    println!();
    println!("  {:<12} {:>14} {:>10} {:>10}", "project", "cost delta", "risk", "risk'");
    for impact in &diff.affected {
        println!(
            "  {:<12} {:>14.0} {:>10} {:>10}",
            impact.project_id,
            impact.cost_delta,
            fmt_opt(impact.before.risk_score_overall, 1),
            fmt_opt(impact.after.risk_score_overall, 1)
        );
    }
    let relieved = diff.overloads.iter().filter(|o| o.relieved).count();
    if !diff.overloads.is_empty() {
        println!();
        println!("  overloads touched: {} ({relieved} relieved)", diff.overloads.len());
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.decimals$}"))
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
