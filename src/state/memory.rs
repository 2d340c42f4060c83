// file: src/state/memory.rs
// version: 1.0.0
// guid: 9e4a7c2d-3b81-4d6f-a0e5-47c9d2b8f163

//! Volatile run state for dry runs and tests

use super::{RunStateSnapshot, SnapshotBackend};
use crate::error::{BootstrapError, Result};
use std::sync::Mutex;

/// Run state held in process memory
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<RunStateSnapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of existing state, e.g. the durable file for a dry run
    pub fn from_snapshot(snapshot: RunStateSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }
}

impl SnapshotBackend for MemoryStateStore {
    fn load(&self) -> Result<RunStateSnapshot> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| BootstrapError::state("in-memory run state lock poisoned"))
    }

    fn save(&self, snapshot: &RunStateSnapshot) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| BootstrapError::state("in-memory run state lock poisoned"))?;
        *guard = snapshot.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.save(&RunStateSnapshot::default())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
