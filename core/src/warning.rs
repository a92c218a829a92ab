//! Non-fatal data-quality findings.
//!
//! Warnings never abort a run. They are collected per cluster+phase unit,
//! logged at `warn`, and persisted as JSON on the run record.

use crate::types::{ProjectId, UpgradeId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// COST_ALLOCATED shares for one upgrade add up to more than 1.0 + ε.
    AllocationOverflow {
        upgrade_id:  UpgradeId,
        total_share: f64,
    },
    /// A link points at a project or upgrade that is not in the snapshot.
    DanglingLink {
        project_id: ProjectId,
        upgrade_id: UpgradeId,
        missing:    MissingSide,
    },
    NonPositiveCapacity {
        project_id:  ProjectId,
        mw_capacity: f64,
    },
    /// A COST_ALLOCATED link with neither a percentage nor a derivable share.
    MissingAllocationShare {
        project_id: ProjectId,
        upgrade_id: UpgradeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSide {
    Project,
    Upgrade,
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationOverflow { upgrade_id, total_share } => {
                write!(f, "upgrade {upgrade_id}: allocation shares sum to {total_share:.6}")
            }
            Self::DanglingLink { project_id, upgrade_id, missing } => {
                let side = match missing {
                    MissingSide::Project => "project",
                    MissingSide::Upgrade => "upgrade",
                };
                write!(f, "link {project_id} -> {upgrade_id}: unknown {side}, skipped")
            }
            Self::NonPositiveCapacity { project_id, mw_capacity } => {
                write!(f, "project {project_id}: capacity {mw_capacity} MW is not positive")
            }
            Self::MissingAllocationShare { project_id, upgrade_id } => {
                write!(f, "link {project_id} -> {upgrade_id}: no allocation share")
            }
        }
    }
}

/// Collects warnings for one unit and logs each as it is recorded.
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    entries: Vec<DataQualityWarning>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, warning: DataQualityWarning) {
        log::warn!("data quality: {warning}");
        self.entries.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[DataQualityWarning] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<DataQualityWarning> {
        self.entries
    }
}
