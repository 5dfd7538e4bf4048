// src/accum.rs

//! Shared accumulators: named counters merged across concurrently running
//! steps.
//!
//! The registry is constructed from every step's declared requests before
//! the first scheduling round (the scheduler cannot be built without one),
//! then handed to each submission. Counters are atomic, so workers bump
//! them without coordination.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

/// Cheap-clone handle to the shared counter registry.
#[derive(Debug, Clone, Default)]
pub struct Accumulators {
    counters: Arc<BTreeMap<String, AtomicU64>>,
}

impl Accumulators {
    /// Build the registry from the union of all step requests.
    pub fn from_requests(requests: impl IntoIterator<Item = String>) -> Self {
        let counters: BTreeMap<String, AtomicU64> = requests
            .into_iter()
            .map(|name| (name, AtomicU64::new(0)))
            .collect();

        debug!(count = counters.len(), "initialized accumulators");

        Self {
            counters: Arc::new(counters),
        }
    }

    /// Add `n` to the named counter.
    ///
    /// Bumping an unrequested accumulator is a no-op; the request set is
    /// fixed before scheduling starts.
    pub fn bump(&self, name: &str, n: u64) {
        match self.counters.get(name) {
            Some(counter) => {
                counter.fetch_add(n, Ordering::Relaxed);
            }
            None => {
                warn!(accumulator = %name, "bump for unrequested accumulator; ignoring");
            }
        }
    }

    /// Current value of the named counter, if requested.
    pub fn value(&self, name: &str) -> Option<u64> {
        self.counters.get(name).map(|c| c.load(Ordering::Relaxed))
    }

    /// Snapshot of every counter, for end-of-run reporting.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
