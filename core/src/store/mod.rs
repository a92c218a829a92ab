//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The engine calls `ClusterRepository` methods and never executes SQL directly.

mod published;
mod records;

use crate::{
    error::EngineResult,
    model::ClusterSnapshot,
    report::RunReport,
    repository::ClusterRepository,
    scoring::ScoredCluster,
    types::{ClusterKey, LedgerVersion, RunId},
    view::{ClusterSummary, ProjectRiskView},
};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Duration;

pub struct ScoreStore {
    conn: Connection,
    path: String,
}

impl ScoreStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // WAL mode only for real files (shared-memory databases ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(10))?;
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// Open a private in-memory database (used in tests).
    /// The database lives as long as at least one handle to it is open;
    /// `reopen()` handles share it.
    pub fn in_memory() -> EngineResult<Self> {
        let uri = format!(
            "file:queuerisk_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        Self::open(&uri)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_cluster_records.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_published_scores.sql"))?;
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ClusterRepository for ScoreStore {
    fn reopen(&self) -> EngineResult<Self> {
        Self::open(&self.path)
    }

    fn list_clusters(&self) -> EngineResult<Vec<ClusterKey>> {
        records::list_clusters(&self.conn)
    }

    fn load_versioned(&self, key: &ClusterKey) -> EngineResult<(ClusterSnapshot, LedgerVersion)> {
        // Deferred: the first SELECT pins one read snapshot for every table.
        let tx = self.conn.unchecked_transaction()?;
        let version = records::ledger_version(&tx, key)?;
        let snapshot = records::load_snapshot(&tx, key)?;
        tx.commit()?;
        Ok((snapshot, version))
    }

    fn ingest_snapshot(&mut self, snapshot: &ClusterSnapshot) -> EngineResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        records::write_snapshot(&tx, snapshot)?;
        tx.commit()?;
        log::info!(
            "{}: ingested {} projects, {} upgrades, {} links, {} overloads",
            snapshot.key(),
            snapshot.projects.len(),
            snapshot.upgrades.len(),
            snapshot.links.len(),
            snapshot.overloads.len()
        );
        Ok(())
    }

    fn publish_scores(
        &mut self,
        read: LedgerVersion,
        report: &RunReport,
        scored: &ScoredCluster,
    ) -> EngineResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        records::ensure_ledger_version(&tx, &report.key, read)?;
        published::write_publication(&tx, report, scored)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_withdrawal(
        &mut self,
        read: LedgerVersion,
        scenario: &ClusterSnapshot,
        report: &RunReport,
        scored: &ScoredCluster,
    ) -> EngineResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        records::ensure_ledger_version(&tx, scenario.key(), read)?;
        records::write_snapshot(&tx, scenario)?;
        published::write_publication(&tx, report, scored)?;
        tx.commit()?;
        Ok(())
    }

    fn record_run(&mut self, report: &RunReport) -> EngineResult<()> {
        published::upsert_run(&self.conn, report)
    }

    fn published_run(&self, key: &ClusterKey) -> EngineResult<Option<RunId>> {
        published::published_run(&self.conn, key)
    }

    fn run_report(&self, run_id: &str) -> EngineResult<Option<RunReport>> {
        published::run_report(&self.conn, run_id)
    }

    fn published_scores(&self, key: &ClusterKey) -> EngineResult<Vec<ProjectRiskView>> {
        published::published_scores(&self.conn, key, None)
    }

    fn project_risk(
        &self,
        key: &ClusterKey,
        project_id: &str,
    ) -> EngineResult<Option<ProjectRiskView>> {
        Ok(published::published_scores(&self.conn, key, Some(project_id))?
            .into_iter()
            .next())
    }

    fn cluster_summary(&self, key: &ClusterKey) -> EngineResult<ClusterSummary> {
        published::cluster_summary(&self.conn, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;
    use chrono::NaiveDate;

    fn seeded() -> (ScoreStore, ClusterKey) {
        let mut store = ScoreStore::in_memory().unwrap();
        store.migrate().unwrap();
        let key = ClusterKey::new("AG1", "Phase 1");
        let mut snapshot = ClusterSnapshot::empty(key.clone());
        snapshot.cluster.decision_deadline = NaiveDate::from_ymd_opt(2027, 3, 15);
        snapshot.projects = vec![Project::new("AG1-001")];
        store.ingest_snapshot(&snapshot).unwrap();
        (store, key)
    }

    #[test]
    fn malformed_deadline_loads_as_unknown() {
        let (store, key) = seeded();
        store
            .conn
            .execute("UPDATE cluster SET decision_deadline = 'next spring'", [])
            .unwrap();
        let snapshot = store.load_snapshot(&key).unwrap();
        assert_eq!(snapshot.cluster.decision_deadline, None);
        assert_eq!(snapshot.projects.len(), 1);
    }

    #[test]
    fn every_ingest_bumps_the_ledger_version() {
        let (mut store, key) = seeded();
        let (snapshot, first) = store.load_versioned(&key).unwrap();
        store.ingest_snapshot(&snapshot).unwrap();
        let (_, second) = store.load_versioned(&key).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
