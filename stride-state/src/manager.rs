//! The state manager: keyed cache, request dedup and subscriptions.
//!
//! All shared state lives behind one short-lived `std::sync::Mutex` that is
//! never held across an `.await` or while a subscriber callback runs.
//!
//! # Request dedup
//!
//! Each key has at most one in-flight fetch. The fetch runs as a spawned task
//! and the pending map holds a [`Shared`] handle to it. Every caller that
//! needs the value while it is in flight awaits a clone of that handle, so
//! exactly one fetcher call is issued. The task applies its result to the
//! entry and clears the pending slot itself, so background revalidations and
//! fetches whose waiters were all cancelled still complete.
//!
//! # Versioning
//!
//! Entries carry a version bumped by every local write and every accepted
//! remote write. A fetch or remote call captures the version when it starts
//! and only applies its result if that version is still current; otherwise
//! the result is dropped.
//!
//! # Notification ordering
//!
//! Notifications are queued under the same lock as the mutation that caused
//! them and drained FIFO by whichever caller finds the queue idle. Callbacks
//! run without the lock, so they may call back into the manager; anything
//! they trigger is appended to the queue and delivered after them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use stride_core::{CacheConfig, Fetcher, RemoteError, StateError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::entry::{CacheEntry, CacheSnapshot, CacheStatus, Lookup};
use crate::freshness::CacheRead;
use crate::pattern::KeyPattern;
use crate::stats::CacheStats;

type InFlight<V> = Shared<BoxFuture<'static, Result<V, RemoteError>>>;
type Callback<V> = Arc<dyn Fn(&Notification<V>) + Send + Sync>;

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Overrides the resource TTL table for this read.
    pub ttl: Option<Duration>,
}

impl GetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Delivered to subscribers after every status transition of a matching key.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<V> {
    pub key: String,
    pub status: CacheStatus,
    pub version: u64,
    pub value: Option<V>,
    pub error: Option<RemoteError>,
}

impl<V: Clone> Notification<V> {
    fn of(entry: &CacheEntry<V>) -> Self {
        Self {
            key: entry.key.clone(),
            status: entry.status,
            version: entry.version,
            value: entry.value.clone(),
            error: entry.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by [`StateManager::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Unsubscribe::unsubscribe`]
/// or [`StateManager::unsubscribe`].
pub struct Unsubscribe<V> {
    id: SubscriptionId,
    core: Weak<Core<V>>,
}

impl<V> Unsubscribe<V> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription. Returns false if it was already removed or
    /// the manager is gone.
    pub fn unsubscribe(self) -> bool {
        match self.core.upgrade() {
            Some(core) => core.lock().remove_subscription(self.id),
            None => false,
        }
    }
}

impl<V> fmt::Debug for Unsubscribe<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

struct Subscription<V> {
    id: SubscriptionId,
    pattern: KeyPattern,
    callback: Callback<V>,
}

struct Queued<V> {
    note: Notification<V>,
    subscribers: Vec<SubscriptionId>,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    pending: HashMap<String, InFlight<V>>,
    subscriptions: Vec<Subscription<V>>,
    next_subscription: u64,
    outbox: VecDeque<Queued<V>>,
    draining: bool,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn remove_subscription(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }
}

impl<V: Clone> Inner<V> {
    fn entry_mut(&mut self, key: &str, ttl: Duration) -> &mut CacheEntry<V> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(key, ttl))
    }

    /// Queue `note` for every subscription matching its key.
    fn enqueue(&mut self, note: Notification<V>) {
        let subscribers: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|s| s.pattern.matches(&note.key))
            .map(|s| s.id)
            .collect();
        if !subscribers.is_empty() {
            self.outbox.push_back(Queued { note, subscribers });
        }
    }

}

struct Core<V> {
    inner: Mutex<Inner<V>>,
    ttls: CacheConfig,
}

impl<V> Core<V> {
    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the pending slot if a fetch task ends without settling, which
/// happens when the fetcher panics or the runtime shuts down.
struct SettleGuard<V> {
    core: Weak<Core<V>>,
    key: String,
    settled: bool,
}

impl<V> Drop for SettleGuard<V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            let mut inner = core.lock();
            inner.pending.remove(&self.key);
            inner.stats.fetch_errors += 1;
        }
    }
}

/// Resets the draining flag if a callback panics mid-drain.
struct DrainGuard<'a, V> {
    core: &'a Core<V>,
    finished: bool,
}

impl<V> Drop for DrainGuard<'_, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.core.lock().draining = false;
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Core<V> {
    /// Deliver queued notifications unless another caller is already doing so.
    fn flush(&self) {
        {
            let mut inner = self.lock();
            if inner.draining || inner.outbox.is_empty() {
                return;
            }
            inner.draining = true;
        }
        let mut guard = DrainGuard {
            core: self,
            finished: false,
        };
        loop {
            let (note, callbacks) = {
                let mut inner = self.lock();
                let Some(queued) = inner.outbox.pop_front() else {
                    // Cleared under the same lock that observed the empty queue.
                    inner.draining = false;
                    guard.finished = true;
                    return;
                };
                let callbacks: Vec<Callback<V>> = queued
                    .subscribers
                    .iter()
                    .filter_map(|id| {
                        inner
                            .subscriptions
                            .iter()
                            .find(|s| s.id == *id)
                            .map(|s| Arc::clone(&s.callback))
                    })
                    .collect();
                (queued.note, callbacks)
            };
            for callback in callbacks {
                callback(&note);
            }
        }
    }

    /// Apply a finished fetch to its entry and clear the pending slot.
    fn settle(&self, key: &str, start_version: u64, result: &Result<V, RemoteError>) {
        {
            let mut inner = self.lock();
            inner.pending.remove(key);
            if result.is_err() {
                inner.stats.fetch_errors += 1;
            }
            let now = Instant::now();
            let applied = match inner.entries.get_mut(key) {
                Some(entry) if entry.version == start_version => {
                    match result {
                        Ok(value) => {
                            entry.write_remote(value.clone(), now);
                            debug!(key, version = entry.version, "Fetch applied");
                        }
                        Err(error) => {
                            entry.fail(error.clone());
                            warn!(
                                key,
                                error = %error,
                                has_value = entry.value.is_some(),
                                "Fetch failed"
                            );
                        }
                    }
                    Some(Notification::of(entry))
                }
                _ => None,
            };
            match applied {
                Some(note) => inner.enqueue(note),
                None => {
                    inner.stats.discarded += 1;
                    debug!(key, start_version, "Discarding superseded fetch result");
                }
            }
        }
        self.flush();
    }
}

/// Single source of truth for remote-backed values, addressed by key.
///
/// Cheap to clone; clones share the same cache.
pub struct StateManager<V = serde_json::Value> {
    core: Arc<Core<V>>,
}

impl<V> Clone for StateManager<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> fmt::Debug for StateManager<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.lock();
        f.debug_struct("StateManager")
            .field("entries", &inner.entries.len())
            .field("pending", &inner.pending.len())
            .field("subscriptions", &inner.subscriptions.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> StateManager<V> {
    /// Create an empty manager using `ttls` to resolve per-resource TTLs.
    pub fn new(ttls: CacheConfig) -> Self {
        Self {
            core: Arc::new(Core {
                inner: Mutex::new(Inner {
                    entries: HashMap::new(),
                    pending: HashMap::new(),
                    subscriptions: Vec::new(),
                    next_subscription: 0,
                    outbox: VecDeque::new(),
                    draining: false,
                    stats: CacheStats::default(),
                }),
                ttls,
            }),
        }
    }

    /// Read `key`, fetching it if nothing servable is cached.
    ///
    /// Fresh values return without I/O. Stale values return immediately and
    /// trigger a background revalidation unless one is already in flight.
    /// Otherwise the call waits on the single in-flight fetch for the key.
    ///
    /// A waiting caller whose fetch fails gets [`StateError::Fetch`] unless a
    /// last good value exists, in which case that value is returned with the
    /// error attached.
    pub async fn get<F>(
        &self,
        key: &str,
        fetcher: F,
        options: GetOptions,
    ) -> Result<CacheRead<V>, StateError>
    where
        F: Fetcher<V> + 'static,
    {
        validate_key(key)?;
        let ttl = options.ttl.unwrap_or_else(|| self.core.ttls.ttl_for_key(key));
        let now = Instant::now();

        let in_flight = {
            let mut inner = self.core.lock();
            let entry = inner.entry_mut(key, ttl);
            entry.ttl = ttl;
            let lookup = entry.lookup(now);
            let cached = entry.read(entry.effective_status(now), true);

            match (lookup, cached) {
                (Lookup::Hit, Some(read)) => {
                    inner.stats.hits += 1;
                    debug!(key, version = read.version(), "Cache hit");
                    return Ok(read);
                }
                (Lookup::Stale, Some(read)) => {
                    inner.stats.stale_hits += 1;
                    if inner.pending.contains_key(key) {
                        inner.stats.deduplicated += 1;
                        debug!(key, "Serving stale value, revalidation in flight");
                    } else {
                        debug!(key, "Serving stale value, revalidating");
                        let _revalidation = self.start_fetch(&mut inner, key, fetcher);
                    }
                    drop(inner);
                    self.core.flush();
                    return Ok(read);
                }
                _ => {
                    inner.stats.misses += 1;
                    let existing = inner.pending.get(key).cloned();
                    match existing {
                        Some(fetch) => {
                            inner.stats.deduplicated += 1;
                            debug!(key, "Joining in-flight fetch");
                            fetch
                        }
                        None => self.start_fetch(&mut inner, key, fetcher),
                    }
                }
            }
        };
        self.core.flush();

        let result = in_flight.await;

        let current = {
            let inner = self.core.lock();
            inner
                .entries
                .get(key)
                .and_then(|entry| entry.read(entry.status, false))
        };
        match (current, result) {
            (Some(read), _) => Ok(read),
            (None, Ok(value)) => Ok(CacheRead::new(
                value,
                CacheStatus::Fresh,
                0,
                Some(Instant::now()),
                None,
                false,
            )),
            (None, Err(source)) => Err(StateError::Fetch {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Spawn the single in-flight fetch for `key`. Caller holds the lock.
    fn start_fetch<F>(&self, inner: &mut Inner<V>, key: &str, fetcher: F) -> InFlight<V>
    where
        F: Fetcher<V> + 'static,
    {
        let mut note = None;
        let start_version = match inner.entries.get_mut(key) {
            Some(entry) => {
                if entry.value.is_none() {
                    entry.status = CacheStatus::Fetching;
                    note = Some(Notification::of(entry));
                }
                entry.version
            }
            None => 0,
        };
        if let Some(note) = note {
            inner.enqueue(note);
        }

        // The fetch runs as its own task so it settles even if every waiter
        // is dropped. Weak: the task must not keep the manager alive.
        let mut guard = SettleGuard {
            core: Arc::downgrade(&self.core),
            key: key.to_string(),
            settled: false,
        };
        let task = tokio::spawn(async move {
            let result = fetcher.fetch().await;
            guard.settled = true;
            if let Some(core) = guard.core.upgrade() {
                core.settle(&guard.key, start_version, &result);
            }
            result
        });
        let fetch = task
            .map(|joined| {
                joined.unwrap_or_else(|error| {
                    Err(RemoteError::new(format!("fetch task ended early: {error}")))
                })
            })
            .boxed()
            .shared();

        inner.pending.insert(key.to_string(), fetch.clone());
        inner.stats.fetches_started += 1;
        debug!(key, start_version, "Fetch started");
        fetch
    }

    /// Register `callback` for every status transition of keys matching
    /// `pattern` (exact key, or glob with `*`).
    pub fn subscribe<C>(&self, pattern: &str, callback: C) -> Result<Unsubscribe<V>, StateError>
    where
        C: Fn(&Notification<V>) + Send + Sync + 'static,
    {
        let pattern = KeyPattern::parse(pattern)?;
        let mut inner = self.core.lock();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        debug!(pattern = pattern.as_str(), id = id.0, "Subscribed");
        inner.subscriptions.push(Subscription {
            id,
            pattern,
            callback: Arc::new(callback),
        });
        Ok(Unsubscribe {
            id,
            core: Arc::downgrade(&self.core),
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.lock().remove_subscription(id)
    }

    /// Local optimistic write. Returns the new version.
    pub fn set(&self, key: &str, value: V) -> Result<u64, StateError> {
        validate_key(key)?;
        let ttl = self.core.ttls.ttl_for_key(key);
        let version = {
            let mut inner = self.core.lock();
            let entry = inner.entry_mut(key, ttl);
            entry.write_local(value, Instant::now());
            let note = Notification::of(entry);
            let version = note.version;
            inner.enqueue(note);
            version
        };
        debug!(key, version, "Local write");
        self.core.flush();
        Ok(version)
    }

    /// Optimistic update backed by a remote call.
    ///
    /// `updater` receives a copy of the current value and runs without the
    /// cache lock, so it may read or write through the manager. Its result is
    /// written and announced at once, replacing whatever is cached by then;
    /// then `remote_call` runs. On success the remote value
    /// becomes the fresh value. On failure the entry is restored exactly as it
    /// was before the update and [`StateError::Rollback`] is returned. If a
    /// newer write landed while the call was outstanding, the entry is left
    /// alone either way.
    pub async fn mutate<U, R>(&self, key: &str, updater: U, remote_call: R) -> Result<V, StateError>
    where
        U: FnOnce(Option<&V>) -> V,
        R: Fetcher<V>,
    {
        validate_key(key)?;
        let ttl = self.core.ttls.ttl_for_key(key);
        let (current, seen_version) = {
            let mut inner = self.core.lock();
            let entry = inner.entry_mut(key, ttl);
            (entry.value.clone(), entry.version)
        };
        let next = updater(current.as_ref());

        let (checkpoint, optimistic_version) = {
            let mut inner = self.core.lock();
            let entry = inner.entry_mut(key, ttl);
            if entry.version != seen_version {
                debug!(key, seen_version, version = entry.version, "Entry moved while updater ran");
            }
            let checkpoint = entry.checkpoint();
            entry.write_local(next, Instant::now());
            let note = Notification::of(entry);
            let version = note.version;
            inner.enqueue(note);
            (checkpoint, version)
        };
        self.core.flush();

        let outcome = remote_call.fetch().await;

        let result = {
            let mut inner = self.core.lock();
            let now = Instant::now();
            let current = inner
                .entries
                .get_mut(key)
                .filter(|entry| entry.version == optimistic_version);
            match (outcome, current) {
                (Ok(value), Some(entry)) => {
                    entry.write_remote(value.clone(), now);
                    let note = Notification::of(entry);
                    inner.enqueue(note);
                    debug!(key, "Mutation committed");
                    Ok(value)
                }
                (Ok(value), None) => {
                    inner.stats.discarded += 1;
                    debug!(key, "Mutation superseded, keeping newer write");
                    Ok(value)
                }
                (Err(source), current) => {
                    if let Some(entry) = current {
                        entry.restore(checkpoint);
                        let mut note = Notification::of(entry);
                        note.error = Some(source.clone());
                        inner.enqueue(note);
                        warn!(key, error = %source, "Mutation failed, rolled back");
                    } else {
                        warn!(key, error = %source, "Mutation failed after being superseded");
                    }
                    inner.stats.rollbacks += 1;
                    Err(StateError::Rollback {
                        key: key.to_string(),
                        source,
                    })
                }
            }
        };
        self.core.flush();
        result
    }

    /// Mark `key` stale so the next read revalidates. Any fetch in flight for
    /// it will be discarded. Returns false if the key was never cached.
    pub fn invalidate(&self, key: &str) -> Result<bool, StateError> {
        validate_key(key)?;
        let found = {
            let mut inner = self.core.lock();
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.invalidate();
                    let note = Notification::of(entry);
                    inner.enqueue(note);
                    true
                }
                None => false,
            }
        };
        if found {
            debug!(key, "Invalidated");
            self.core.flush();
        }
        Ok(found)
    }

    /// Invalidate every cached key matching `pattern`. Returns how many.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize, StateError> {
        let pattern = KeyPattern::parse(pattern)?;
        let count = {
            let mut inner = self.core.lock();
            let mut keys: Vec<String> = inner
                .entries
                .keys()
                .filter(|key| pattern.matches(key))
                .cloned()
                .collect();
            keys.sort();
            for key in &keys {
                if let Some(entry) = inner.entries.get_mut(key) {
                    entry.invalidate();
                    let note = Notification::of(entry);
                    inner.enqueue(note);
                }
            }
            keys.len()
        };
        debug!(pattern = pattern.as_str(), count, "Invalidated matching keys");
        self.core.flush();
        Ok(count)
    }

    /// Current state of `key` without triggering I/O.
    pub fn peek(&self, key: &str) -> Option<CacheSnapshot<V>> {
        let inner = self.core.lock();
        inner
            .entries
            .get(key)
            .map(|entry| entry.snapshot(Instant::now()))
    }

    /// True while a fetch for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.core.lock().pending.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.core.lock().stats
    }

    pub fn len(&self) -> usize {
        self.core.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() {
        return Err(StateError::InvalidArgument {
            field: "key",
            reason: "key must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager() -> StateManager<u32> {
        StateManager::new(CacheConfig {
            default_ttl_ms: 60_000,
            resources: BTreeMap::from([("game-state".to_string(), 0)]),
        })
    }

    fn counting(calls: &Arc<AtomicU32>, value: u32) -> impl Fetcher<u32> + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RemoteError>(value)
            }
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let state = manager();
        let calls = Arc::new(AtomicU32::new(0));

        let first = state
            .get("athletes", counting(&calls, 7), GetOptions::default())
            .await
            .unwrap();
        assert_eq!(*first.value(), 7);
        assert!(first.was_cache_miss());
        assert_eq!(first.status(), CacheStatus::Fresh);

        let second = state
            .get("athletes", counting(&calls, 8), GetOptions::default())
            .await
            .unwrap();
        assert_eq!(*second.value(), 7);
        assert!(second.was_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.stats().hits, 1);
        assert_eq!(state.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let state = manager();
        let err = state
            .get("", counting(&Arc::new(AtomicU32::new(0)), 1), GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidArgument { field: "key", .. }));
        assert!(state.set("", 1).is_err());
    }

    #[tokio::test]
    async fn test_failed_first_fetch_is_error_without_value() {
        let state = manager();
        let err = state
            .get(
                "results",
                || async { Err::<u32, _>(RemoteError::new("503")) },
                GetOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StateError::Fetch {
                key: "results".to_string(),
                source: RemoteError::new("503"),
            }
        );
        let snapshot = state.peek("results").unwrap();
        assert_eq!(snapshot.status, CacheStatus::Error);
        assert_eq!(snapshot.value, None);
        assert!(!state.is_pending("results"));
    }

    #[tokio::test]
    async fn test_zero_ttl_refetches_every_time() {
        let state = manager();
        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let read = state
                .get("game-state:1", counting(&calls, 1), GetOptions::default())
                .await
                .unwrap();
            assert_eq!(read.status(), CacheStatus::Fresh);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_explicit_ttl_wins_over_table() {
        let state = manager();
        let calls = Arc::new(AtomicU32::new(0));
        let options = GetOptions::with_ttl(Duration::from_secs(60));
        state.get("game-state:1", counting(&calls, 1), options).await.unwrap();
        let read = state.get("game-state:1", counting(&calls, 2), options).await.unwrap();
        assert_eq!(*read.value(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_is_optimistic_and_served() {
        let state = manager();
        let version = state.set("rosters:9", 3).unwrap();
        assert_eq!(version, 1);

        let calls = Arc::new(AtomicU32::new(0));
        let read = state
            .get("rosters:9", counting(&calls, 4), GetOptions::default())
            .await
            .unwrap();
        assert_eq!(*read.value(), 3);
        assert_eq!(read.status(), CacheStatus::Optimistic);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscriber_sees_fetching_then_fresh() {
        let state = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = state
            .subscribe("athletes", move |n: &Notification<u32>| {
                sink.lock().unwrap().push((n.status, n.version, n.value));
            })
            .unwrap();

        state
            .get("athletes", counting(&Arc::new(AtomicU32::new(0)), 5), GetOptions::default())
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (CacheStatus::Fetching, 0, None),
                (CacheStatus::Fresh, 1, Some(5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let state = manager();
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let handle = state
            .subscribe("rosters:*", move |_: &Notification<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        state.set("rosters:1", 1).unwrap();
        assert!(handle.unsubscribe());
        state.set("rosters:1", 2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_keeps_subscription() {
        let state = manager();
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        drop(
            state
                .subscribe("*", move |_: &Notification<u32>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap(),
        );
        state.set("a", 1).unwrap();
        state.set("b", 1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reentrant_callback_keeps_order() {
        let state = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = state.clone();
        state
            .subscribe("*", move |n: &Notification<u32>| {
                sink.lock().unwrap().push((n.key.clone(), n.version));
                if n.key == "a" {
                    inner.set("b", 10).unwrap();
                }
            })
            .unwrap();

        state.set("a", 1).unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_invalidate_makes_entry_stale() {
        let state = manager();
        assert!(!state.invalidate("missing").unwrap());

        state.set("results:1", 1).unwrap();
        assert!(state.invalidate("results:1").unwrap());
        let snapshot = state.peek("results:1").unwrap();
        assert_eq!(snapshot.status, CacheStatus::Stale);
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.value, Some(1));
    }

    #[tokio::test]
    async fn test_invalidate_matching_counts_keys() {
        let state = manager();
        state.set("rankings:1:A", 1).unwrap();
        state.set("rankings:1:B", 1).unwrap();
        state.set("rosters:1", 1).unwrap();
        assert_eq!(state.invalidate_matching("rankings:*").unwrap(), 2);
        assert_eq!(state.peek("rosters:1").unwrap().status, CacheStatus::Optimistic);
    }

    #[tokio::test]
    async fn test_mutate_commits_remote_value() {
        let state = manager();
        state.set("rosters:1", 10).unwrap();
        let result = state
            .mutate("rosters:1", |v| v.copied().unwrap_or(0) + 1, || async {
                Ok::<_, RemoteError>(12)
            })
            .await
            .unwrap();
        assert_eq!(result, 12);
        let snapshot = state.peek("rosters:1").unwrap();
        assert_eq!(snapshot.value, Some(12));
        assert_eq!(snapshot.status, CacheStatus::Fresh);
        assert_eq!(snapshot.version, 3);
    }

    #[tokio::test]
    async fn test_mutate_updater_may_read_the_manager() {
        let state = manager();
        state.set("rosters:5", 2).unwrap();
        let reader = state.clone();
        let result = state
            .mutate(
                "rosters:5",
                move |v| {
                    let peeked = reader.peek("rosters:5").and_then(|s| s.value);
                    v.copied().unwrap_or(0) + peeked.unwrap_or(0)
                },
                || async { Ok::<_, RemoteError>(4) },
            )
            .await
            .unwrap();
        assert_eq!(result, 4);
        assert_eq!(state.peek("rosters:5").unwrap().value, Some(4));
    }

    #[tokio::test]
    async fn test_mutate_rollback_restores_write_made_by_updater() {
        let state = manager();
        state.set("rosters:6", 1).unwrap();
        let writer = state.clone();
        let err = state
            .mutate(
                "rosters:6",
                move |v| {
                    writer.set("rosters:6", 50).unwrap();
                    v.copied().unwrap_or(0) + 1
                },
                || async { Err::<u32, _>(RemoteError::new("conflict")) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Rollback { .. }));
        // The checkpoint is taken when the optimistic value is written.
        let snapshot = state.peek("rosters:6").unwrap();
        assert_eq!(snapshot.value, Some(50));
        assert_eq!(snapshot.status, CacheStatus::Optimistic);
    }

    #[tokio::test]
    async fn test_mutate_on_empty_key_rolls_back_to_empty() {
        let state = manager();
        let err = state
            .mutate(
                "rosters:2",
                |_| 1,
                || async { Err::<u32, _>(RemoteError::new("409 conflict")) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Rollback { .. }));
        let snapshot = state.peek("rosters:2").unwrap();
        assert_eq!(snapshot.value, None);
        assert_eq!(snapshot.status, CacheStatus::Empty);
        assert_eq!(state.stats().rollbacks, 1);
    }
}
