//! One matching run per batch.
//!
//! # Safety
//! - The guard is released when dropped, including on error and unwind
//! - Acquisition never blocks; a second run is rejected immediately

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::MatchError;
use crate::id::BatchId;

/// In-process registry of batches with a run in progress.
#[derive(Debug, Clone, Default)]
pub struct BatchRegistry {
    active: Arc<Mutex<HashSet<BatchId>>>,
}

impl BatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `batch` for the lifetime of the returned guard.
    ///
    /// # Errors
    /// - `ConcurrentRun` if another guard for `batch` is alive
    pub fn acquire(&self, batch: BatchId) -> Result<BatchGuard, MatchError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !active.insert(batch) {
            return Err(MatchError::ConcurrentRun { id: batch });
        }
        Ok(BatchGuard {
            registry: Arc::clone(&self.active),
            batch,
        })
    }

    /// True if a run for `batch` is in progress.
    #[must_use]
    pub fn is_active(&self, batch: BatchId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&batch)
    }
}

/// Exclusive claim on one batch.
#[derive(Debug)]
pub struct BatchGuard {
    registry: Arc<Mutex<HashSet<BatchId>>>,
    batch: BatchId,
}

impl BatchGuard {
    #[must_use]
    pub const fn batch(&self) -> BatchId {
        self.batch
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        // A poisoned registry is still consistent: entries are plain ids.
        let mut active = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        active.remove(&self.batch);
    }
}
