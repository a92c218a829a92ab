//! Shared primitive types used across the entire engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Interconnection queue position, e.g. "AG2-123".
pub type ProjectId = String;

/// RTEP identifier of a network upgrade.
pub type UpgradeId = String;

/// The canonical scoring-run identifier (UUID v4).
pub type RunId = String;

/// Monotonic counter of raw-record rewrites for one cluster+phase.
pub type LedgerVersion = i64;

/// Identity of one study population: cluster name plus phase.
/// Every population statistic (rank, percentile, normalisation maxima)
/// is computed within exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub name:  String,
    pub phase: String,
}

impl ClusterKey {
    pub fn new(name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self { name: name.into(), phase: phase.into() }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.phase)
    }
}
