//! Cache entries and their status machine.

use std::time::Duration;

use serde::Serialize;
use stride_core::RemoteError;
use tokio::time::Instant;

use crate::freshness::CacheRead;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Never fetched or written.
    Empty,
    /// First fetch in flight, no value yet.
    Fetching,
    /// Value confirmed by the remote and within its TTL.
    Fresh,
    /// Value past its TTL or explicitly invalidated.
    Stale,
    /// Last fetch failed; any previous value is retained.
    Error,
    /// Local write not yet confirmed by the remote.
    Optimistic,
}

/// How a read should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Serve from cache, no I/O.
    Hit,
    /// Serve the cached value and revalidate in the background.
    Stale,
    /// Nothing servable; wait for a fetch.
    Miss,
}

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) key: String,
    pub(crate) value: Option<V>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) ttl: Duration,
    pub(crate) version: u64,
    pub(crate) status: CacheStatus,
    pub(crate) last_error: Option<RemoteError>,
}

/// The parts of an entry `mutate` restores on rollback.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint<V> {
    value: Option<V>,
    fetched_at: Option<Instant>,
    status: CacheStatus,
    last_error: Option<RemoteError>,
}

impl<V: Clone> CacheEntry<V> {
    pub(crate) fn new(key: &str, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            value: None,
            fetched_at: None,
            ttl,
            version: 0,
            status: CacheStatus::Empty,
            last_error: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) >= self.ttl,
            None => true,
        }
    }

    /// Status as observed at `now`: a fresh or optimistic value past its TTL
    /// reads as stale.
    pub(crate) fn effective_status(&self, now: Instant) -> CacheStatus {
        match self.status {
            CacheStatus::Fresh | CacheStatus::Optimistic if self.is_expired(now) => {
                CacheStatus::Stale
            }
            status => status,
        }
    }

    pub(crate) fn lookup(&self, now: Instant) -> Lookup {
        if self.value.is_none() || self.ttl.is_zero() {
            return Lookup::Miss;
        }
        match self.effective_status(now) {
            CacheStatus::Fresh | CacheStatus::Optimistic => Lookup::Hit,
            _ => Lookup::Stale,
        }
    }

    /// Record a local write.
    pub(crate) fn write_local(&mut self, value: V, now: Instant) {
        self.value = Some(value);
        self.fetched_at = Some(now);
        self.status = CacheStatus::Optimistic;
        self.last_error = None;
        self.version += 1;
    }

    /// Record a value accepted from the remote.
    pub(crate) fn write_remote(&mut self, value: V, now: Instant) {
        self.value = Some(value);
        self.fetched_at = Some(now);
        self.status = CacheStatus::Fresh;
        self.last_error = None;
        self.version += 1;
    }

    pub(crate) fn fail(&mut self, error: RemoteError) {
        self.status = CacheStatus::Error;
        self.last_error = Some(error);
    }

    pub(crate) fn invalidate(&mut self) {
        self.status = if self.value.is_some() {
            CacheStatus::Stale
        } else {
            CacheStatus::Empty
        };
        self.version += 1;
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint<V> {
        Checkpoint {
            value: self.value.clone(),
            fetched_at: self.fetched_at,
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }

    /// Put back exactly what `checkpoint` captured. Counts as a local write.
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint<V>) {
        self.value = checkpoint.value;
        self.fetched_at = checkpoint.fetched_at;
        self.status = checkpoint.status;
        self.last_error = checkpoint.last_error;
        self.version += 1;
    }

    /// Build a read reporting `status`, if the entry holds a value.
    pub(crate) fn read(&self, status: CacheStatus, was_cache_hit: bool) -> Option<CacheRead<V>> {
        self.value.clone().map(|value| {
            CacheRead::new(
                value,
                status,
                self.version,
                self.fetched_at,
                self.last_error.clone(),
                was_cache_hit,
            )
        })
    }

    pub(crate) fn snapshot(&self, now: Instant) -> CacheSnapshot<V> {
        CacheSnapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            status: self.effective_status(now),
            version: self.version,
            error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of an entry, returned by `StateManager::peek`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<V> {
    pub key: String,
    pub value: Option<V>,
    pub status: CacheStatus,
    pub version: u64,
    pub error: Option<RemoteError>,
}
