//! Staleness metadata attached to every cache read.
//!
//! A read never silently hides how old its value is: callers get the entry
//! status, the version they observed, and any error from the last refresh.

use std::time::Duration;

use stride_core::RemoteError;
use tokio::time::Instant;

use crate::entry::CacheStatus;

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    status: CacheStatus,
    version: u64,
    fetched_at: Option<Instant>,
    error: Option<RemoteError>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(
        value: T,
        status: CacheStatus,
        version: u64,
        fetched_at: Option<Instant>,
        error: Option<RemoteError>,
        was_cache_hit: bool,
    ) -> Self {
        Self {
            value,
            status,
            version,
            fetched_at,
            error,
            was_cache_hit,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Entry status at the moment of the read.
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when the value is past its TTL, invalidated, or the last refresh
    /// failed.
    pub fn is_stale(&self) -> bool {
        matches!(self.status, CacheStatus::Stale | CacheStatus::Error)
    }

    /// The error from the most recent failed refresh, if any.
    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    /// Time since the value was last written.
    pub fn staleness(&self) -> Duration {
        self.fetched_at
            .map(|at| Instant::now().saturating_duration_since(at))
            .unwrap_or(Duration::ZERO)
    }

    /// Served without waiting on a fetch.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            status: self.status,
            version: self.version,
            fetched_at: self.fetched_at,
            error: self.error,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_statuses() {
        let read = CacheRead::new(1, CacheStatus::Error, 2, None, None, true);
        assert!(read.is_stale());
        let read = CacheRead::new(1, CacheStatus::Optimistic, 2, None, None, true);
        assert!(!read.is_stale());
    }

    #[test]
    fn test_map_keeps_metadata() {
        let read = CacheRead::new(
            21,
            CacheStatus::Stale,
            4,
            None,
            Some(RemoteError::new("offline")),
            true,
        );
        let doubled = read.map(|v| v * 2);
        assert_eq!(*doubled.value(), 42);
        assert_eq!(doubled.version(), 4);
        assert_eq!(doubled.error().map(ToString::to_string).as_deref(), Some("offline"));
        assert!(doubled.was_cache_hit());
    }

    #[test]
    fn test_staleness_without_fetch_is_zero() {
        let read = CacheRead::new((), CacheStatus::Fresh, 1, None, None, false);
        assert_eq!(read.staleness(), Duration::ZERO);
        assert!(read.was_cache_miss());
    }
}
