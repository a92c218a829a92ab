//! The engine's only view of storage.
//!
//! Reads return complete snapshots; writes are all-or-nothing per
//! cluster+phase. Writes that were computed from a snapshot carry the
//! ledger version it was read at and fail with `LedgerChanged` if the raw
//! records moved in between. `ScoreStore` (SQLite) is the shipped
//! implementation.

use crate::{
    error::EngineResult,
    model::ClusterSnapshot,
    report::RunReport,
    scoring::ScoredCluster,
    types::{ClusterKey, LedgerVersion, RunId},
    view::{ClusterSummary, ProjectRiskView},
};

pub trait ClusterRepository: Send {
    /// Open an independent handle to the same underlying data, for use
    /// on another worker thread.
    fn reopen(&self) -> EngineResult<Self>
    where
        Self: Sized;

    // ── Inbound ────────────────────────────────────────────────

    fn list_clusters(&self) -> EngineResult<Vec<ClusterKey>>;

    /// One consistent snapshot plus the ledger version it was read at.
    fn load_versioned(&self, key: &ClusterKey) -> EngineResult<(ClusterSnapshot, LedgerVersion)>;

    fn load_snapshot(&self, key: &ClusterKey) -> EngineResult<ClusterSnapshot> {
        Ok(self.load_versioned(key)?.0)
    }

    /// Replace every raw record of the snapshot's cluster+phase.
    fn ingest_snapshot(&mut self, snapshot: &ClusterSnapshot) -> EngineResult<()>;

    // ── Publication ────────────────────────────────────────────

    /// Write a completed run and swap the cluster's publication pointer
    /// to it, in one transaction.
    fn publish_scores(
        &mut self,
        read: LedgerVersion,
        report: &RunReport,
        scored: &ScoredCluster,
    ) -> EngineResult<()>;

    /// Rewrite the ledger to `scenario` and publish `scored` against it,
    /// in one transaction.
    fn apply_withdrawal(
        &mut self,
        read: LedgerVersion,
        scenario: &ClusterSnapshot,
        report: &RunReport,
        scored: &ScoredCluster,
    ) -> EngineResult<()>;

    /// Record a run that did not publish (metadata only).
    fn record_run(&mut self, report: &RunReport) -> EngineResult<()>;

    // ── Outbound read API ──────────────────────────────────────

    fn published_run(&self, key: &ClusterKey) -> EngineResult<Option<RunId>>;

    fn run_report(&self, run_id: &str) -> EngineResult<Option<RunReport>>;

    fn published_scores(&self, key: &ClusterKey) -> EngineResult<Vec<ProjectRiskView>>;

    fn project_risk(&self, key: &ClusterKey, project_id: &str)
        -> EngineResult<Option<ProjectRiskView>>;

    fn cluster_summary(&self, key: &ClusterKey) -> EngineResult<ClusterSummary>;
}
