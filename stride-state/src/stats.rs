//! Cache counters.

use serde::Serialize;

/// Counters accumulated by a `StateManager` since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads served from a fresh or optimistic entry.
    pub hits: u64,
    /// Reads served from a stale entry while revalidating.
    pub stale_hits: u64,
    /// Reads that had to wait on a fetch.
    pub misses: u64,
    /// Remote fetches actually started.
    pub fetches_started: u64,
    /// Reads that joined a fetch or revalidation already in flight.
    pub deduplicated: u64,
    pub fetch_errors: u64,
    /// Remote results dropped because a newer write landed first.
    pub discarded: u64,
    pub rollbacks: u64,
}

impl CacheStats {
    /// Share of reads answered without waiting (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
