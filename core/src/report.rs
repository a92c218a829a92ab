//! Run metadata for one cluster+phase scoring unit.

use crate::{
    types::{ClusterKey, RunId},
    warning::DataQualityWarning,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Published,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running   => "running",
            Self::Published => "published",
            Self::Failed    => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running"   => Some(Self::Running),
            "published" => Some(Self::Published),
            "failed"    => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id:        RunId,
    pub key:           ClusterKey,
    pub status:        RunStatus,
    pub started_at:    DateTime<Utc>,
    pub finished_at:   Option<DateTime<Utc>>,
    pub project_count: usize,
    pub warnings:      Vec<DataQualityWarning>,
    pub error:         Option<String>,
}

impl RunReport {
    pub fn start(key: ClusterKey) -> Self {
        Self {
            run_id:        uuid::Uuid::new_v4().to_string(),
            key,
            status:        RunStatus::Running,
            started_at:    Utc::now(),
            finished_at:   None,
            project_count: 0,
            warnings:      Vec::new(),
            error:         None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
