//! In-progress guard
//!
//! Process-wide set of source paths that are currently being organized, keyed by
//! the same identity as `organization_results.id`. Contenders fail fast instead of
//! waiting. The guard is injected (`Arc<InProgressGuard>`) wherever "is this running"
//! must be answered, so tests can use their own instance.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::db::organization_results::result_id_for_path;

/// Keyed mutual-exclusion set.
#[derive(Debug, Default)]
pub struct InProgressGuard {
    held: Mutex<HashSet<String>>,
}

impl InProgressGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns false when another operation already holds it.
    pub fn try_acquire(&self, key: &str) -> bool {
        let acquired = self.held.lock().insert(key.to_string());
        trace!(key = %key, acquired, "In-progress acquire");
        acquired
    }

    /// Release `key`. Releasing an unheld key returns false and is not an error.
    pub fn release(&self, key: &str) -> bool {
        let released = self.held.lock().remove(key);
        trace!(key = %key, released, "In-progress release");
        released
    }

    pub fn is_in_progress(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }

    /// Claim the key derived from a source path
    pub fn try_acquire_path(&self, path: &str) -> bool {
        self.try_acquire(&result_id_for_path(path))
    }

    /// Release the key derived from a source path
    pub fn release_path(&self, path: &str) -> bool {
        self.release(&result_id_for_path(path))
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }

    /// Claim `key` and return a lease that releases it when dropped.
    pub fn lease(self: &Arc<Self>, key: impl Into<String>) -> Option<InProgressLease> {
        let key = key.into();
        if self.try_acquire(&key) {
            Some(InProgressLease {
                guard: Arc::clone(self),
                key,
            })
        } else {
            None
        }
    }
}

/// Ownership of one guard key for the duration of an operation.
#[derive(Debug)]
pub struct InProgressLease {
    guard: Arc<InProgressGuard>,
    key: String,
}

impl InProgressLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InProgressLease {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}
