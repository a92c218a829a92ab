use crate::types::{ClusterKey, LedgerVersion, ProjectId};
use thiserror::Error;

/// Fatal errors. Any of these aborts the current cluster+phase unit and
/// rolls back its transaction; previously published results stay visible.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cluster '{key}' not found")]
    ClusterNotFound { key: ClusterKey },

    #[error("Project '{project_id}' not found in cluster '{key}'")]
    ProjectNotFound { key: ClusterKey, project_id: ProjectId },

    #[error("Invariant violated in cluster '{key}': {detail}")]
    InvariantViolation { key: ClusterKey, detail: String },

    #[error("Ledger of '{key}' changed during the run (read version {read}, now {current})")]
    LedgerChanged { key: ClusterKey, read: LedgerVersion, current: LedgerVersion },

    #[error("Scoring run for '{key}' cancelled")]
    Cancelled { key: ClusterKey },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
