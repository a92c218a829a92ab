//! Single-writer guard per cluster+phase and cooperative cancellation.

use crate::{
    error::{EngineError, EngineResult},
    types::ClusterKey,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Advisory locks keyed by cluster+phase, shared by every worker of an engine.
/// Runs for the same key serialize; different keys never contend.
#[derive(Clone, Default)]
pub struct ClusterLocks {
    inner: Arc<Mutex<HashMap<ClusterKey, Arc<Mutex<()>>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &ClusterKey) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone()).or_default().clone()
    }
}

/// Shared cancellation flag. Checked between stages of a unit; a unit
/// that observes it discards its work without publishing.
#[derive(Clone, Default, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self, key: &ClusterKey) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled { key: key.clone() })
        } else {
            Ok(())
        }
    }
}
