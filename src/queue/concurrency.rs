//! Bounded concurrency through the processing directory.
//!
//! There is no counter to keep in sync: the number of `.json` files in
//! `processing/` *is* the number of active tasks. Cross-process exclusion
//! comes entirely from rename atomicity; the local mutex only serializes
//! claim attempts between threads of this process (push handler vs. poll
//! loop). Rename atomicity is a filesystem assumption -- network filesystems
//! may not provide it.

use crate::error::Result;
use crate::queue::store::{list_json, QueueStore};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct ConcurrencyController {
    store: QueueStore,
    ceiling: usize,
    claim_lock: Mutex<()>,
}

impl ConcurrencyController {
    pub fn new(store: QueueStore, ceiling: usize) -> Self {
        Self {
            store,
            ceiling,
            claim_lock: Mutex::new(()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Point-in-time scan of the processing directory.
    pub fn count_active(&self) -> usize {
        list_json(&self.store.processing_dir()).len()
    }

    pub fn can_claim(&self) -> bool {
        self.count_active() < self.ceiling
    }

    /// Re-check the ceiling under the local guard, then attempt the atomic
    /// rename. `Ok(None)` covers both outcomes that are not errors: ceiling
    /// reached, or a concurrent claimer won the rename race.
    pub fn claim(&self, candidate: &Path) -> Result<Option<PathBuf>> {
        let _guard = self
            .claim_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.can_claim() {
            debug!(
                "At concurrency ceiling ({}), not claiming {}",
                self.ceiling,
                candidate.display()
            );
            return Ok(None);
        }

        self.store.claim(candidate)
    }
}
