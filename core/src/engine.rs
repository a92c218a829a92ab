//! The scoring engine: orchestrates one scoring unit per cluster+phase.
//!
//! UNIT LIFECYCLE (fixed order):
//!   1. cancellation check
//!   2. take the cluster's writer lock
//!   3. bulk read of the snapshot and its ledger version, in one read transaction
//!   4. in-memory scoring (no I/O)
//!   5. cancellation check
//!   6. publish in one transaction, refused if the ledger version moved
//!
//! RULES:
//!   - The engine never executes SQL. Storage goes through `ClusterRepository`.
//!   - A cancelled unit writes nothing.
//!   - A failed unit records its run metadata; the previous publication stays.

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    lock::{CancelToken, ClusterLocks},
    report::{RunReport, RunStatus},
    repository::ClusterRepository,
    scoring::{self, ScoredCluster},
    types::ClusterKey,
    view::CostHistogram,
    withdrawal::{self, WithdrawalDiff},
};
use rayon::prelude::*;

/// Result of one unit inside a multi-cluster run.
#[derive(Debug)]
pub struct UnitOutcome {
    pub key:    ClusterKey,
    pub result: EngineResult<RunReport>,
}

impl UnitOutcome {
    pub fn is_published(&self) -> bool {
        matches!(&self.result, Ok(report) if report.status == RunStatus::Published)
    }
}

pub struct ScoringEngine<R: ClusterRepository> {
    repo:   R,
    config: EngineConfig,
    locks:  ClusterLocks,
}

impl<R: ClusterRepository> ScoringEngine<R> {
    pub fn new(repo: R, config: EngineConfig) -> Self {
        Self { repo, config, locks: ClusterLocks::new() }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn repository_mut(&mut self) -> &mut R {
        &mut self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score and publish one cluster+phase.
    pub fn score_cluster(
        &mut self,
        key: &ClusterKey,
        cancel: &CancelToken,
    ) -> EngineResult<RunReport> {
        run_unit(&mut self.repo, key, &self.config, &self.locks, cancel)
    }

    /// Score every listed cluster+phase (all known ones when `keys` is None)
    /// on a worker pool. One unit failing never stops the others.
    pub fn score_all(
        &self,
        keys: Option<Vec<ClusterKey>>,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<UnitOutcome>> {
        let keys = match keys {
            Some(keys) => keys,
            None => self.repo.list_clusters()?,
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Connections are opened here and moved into the workers.
        let units: Vec<(ClusterKey, EngineResult<R>)> = keys
            .into_iter()
            .map(|key| {
                let handle = self.repo.reopen();
                (key, handle)
            })
            .collect();

        let workers = match self.config.workers {
            0 => num_cpus::get(),
            n => n,
        }
        .clamp(1, units.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(anyhow::Error::from)?;
        log::info!("Scoring {} cluster units on {workers} workers", units.len());

        let config = &self.config;
        let locks = &self.locks;
        let outcomes: Vec<UnitOutcome> = pool.install(|| {
            units
                .into_par_iter()
                .map(|(key, handle)| {
                    let result = handle
                        .and_then(|mut repo| run_unit(&mut repo, &key, config, locks, cancel));
                    UnitOutcome { key, result }
                })
                .collect()
        });

        let published = outcomes.iter().filter(|o| o.is_published()).count();
        log::info!("{published}/{} cluster units published", outcomes.len());
        Ok(outcomes)
    }

    /// Propose a withdrawal against the current raw records. Read-only;
    /// takes no lock.
    pub fn simulate_withdrawal(
        &self,
        key: &ClusterKey,
        project_id: &str,
    ) -> EngineResult<WithdrawalDiff> {
        let baseline = self.repo.load_snapshot(key)?;
        let scenario = withdrawal::simulate(&baseline, project_id, &self.config)?;
        let diff = scenario.into_diff();
        log::info!(
            "{key}: simulated withdrawal of {project_id}: {} upgrades, {} projects affected",
            diff.upgrades.len(),
            diff.affected.len()
        );
        Ok(diff)
    }

    /// Commit a withdrawal: rewrite the ledger and publish fresh scores for
    /// the whole cluster, in one transaction.
    pub fn apply_withdrawal(
        &mut self,
        key: &ClusterKey,
        project_id: &str,
        cancel: &CancelToken,
    ) -> EngineResult<(WithdrawalDiff, RunReport)> {
        cancel.check(key)?;
        let lock = self.locks.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut report = RunReport::start(key.clone());
        match commit_withdrawal(&mut self.repo, key, project_id, &self.config, cancel, &mut report) {
            Ok(diff) => {
                log::info!(
                    "{key}: applied withdrawal of {project_id} (run {})",
                    report.run_id
                );
                Ok((diff, report))
            }
            Err(err) => Err(settle_failure(&mut self.repo, report, err)),
        }
    }

    /// $/kW histogram of the currently published run.
    pub fn cost_histogram(&self, key: &ClusterKey) -> EngineResult<CostHistogram> {
        let views = self.repo.published_scores(key)?;
        Ok(CostHistogram::from_views(&views))
    }
}

fn run_unit<R: ClusterRepository>(
    repo: &mut R,
    key: &ClusterKey,
    config: &EngineConfig,
    locks: &ClusterLocks,
    cancel: &CancelToken,
) -> EngineResult<RunReport> {
    cancel.check(key)?;
    let lock = locks.lock_for(key);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

    let mut report = RunReport::start(key.clone());
    log::debug!("{key}: run {} started", report.run_id);

    let result = score_and_publish(repo, key, config, cancel, &mut report);
    match result {
        Ok(()) => {
            log::info!(
                "{key}: published run {} ({} projects, {} warnings)",
                report.run_id,
                report.project_count,
                report.warnings.len()
            );
            Ok(report)
        }
        Err(err) => Err(settle_failure(repo, report, err)),
    }
}

fn score_and_publish<R: ClusterRepository>(
    repo: &mut R,
    key: &ClusterKey,
    config: &EngineConfig,
    cancel: &CancelToken,
    report: &mut RunReport,
) -> EngineResult<()> {
    let (snapshot, version) = repo.load_versioned(key)?;
    cancel.check(key)?;
    let scored = scoring::score_snapshot(&snapshot, config)?;
    cancel.check(key)?;
    stamp(report, &scored);
    repo.publish_scores(version, report, &scored)
}

fn commit_withdrawal<R: ClusterRepository>(
    repo: &mut R,
    key: &ClusterKey,
    project_id: &str,
    config: &EngineConfig,
    cancel: &CancelToken,
    report: &mut RunReport,
) -> EngineResult<WithdrawalDiff> {
    let (baseline, version) = repo.load_versioned(key)?;
    let (scenario, diff) = withdrawal::simulate(&baseline, project_id, config)?.into_applied();
    let scored = scoring::score_snapshot(&scenario, config)?;
    cancel.check(key)?;
    stamp(report, &scored);
    repo.apply_withdrawal(version, &scenario, report, &scored)?;
    Ok(diff)
}

fn stamp(report: &mut RunReport, scored: &ScoredCluster) {
    report.project_count = scored.projects.len();
    report.warnings = scored.warnings.clone();
    report.finish(RunStatus::Published);
}

/// Cancelled units leave no trace. Anything else is recorded as failed so
/// the run history explains why the publication did not move.
fn settle_failure<R: ClusterRepository>(
    repo: &mut R,
    mut report: RunReport,
    err: EngineError,
) -> EngineError {
    let key = report.key.clone();
    if let EngineError::Cancelled { .. } = err {
        log::info!("{key}: run {} cancelled, nothing published", report.run_id);
        return err;
    }
    report.finish(RunStatus::Failed);
    report.error = Some(err.to_string());
    log::error!("{key}: run {} failed: {err}", report.run_id);
    if let Err(record_err) = repo.record_run(&report) {
        log::error!("{key}: could not record failed run {}: {record_err}", report.run_id);
    }
    err
}
