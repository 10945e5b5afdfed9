//! Deduplicated, flag-gated chunk loading.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use stride_core::{LoadError, LoaderConfig, SessionId};
use stride_flags::FeatureFlagEngine;
use stride_telemetry::{ChunkLoadRecord, PerformanceMonitor};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::chunk::{ChunkLoader, ChunkRegistration};

type PendingLoad<M> = Shared<BoxFuture<'static, Result<Arc<M>, LoadError>>>;

/// Outcome of consulting the flag engine for a chunk.
enum Gate<M> {
    Open,
    Closed { flag: String, fallback: Arc<M> },
}

struct LoaderState<M> {
    ready: HashMap<String, Arc<M>>,
    pending: HashMap<String, PendingLoad<M>>,
    registrations: HashMap<String, ChunkRegistration<M>>,
}

struct LoaderInner<M> {
    flags: Arc<FeatureFlagEngine>,
    monitor: Arc<PerformanceMonitor>,
    session: SessionId,
    backoff: Backoff,
    max_attempts: u32,
    /// Chunk -> flag mappings from configuration.
    chunk_flags: BTreeMap<String, String>,
    fallback: Arc<M>,
    state: Mutex<LoaderState<M>>,
}

impl<M> LoaderInner<M> {
    fn lock(&self) -> MutexGuard<'_, LoaderState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, state: &LoaderState<M>, chunk: &str) -> Gate<M> {
        let registration = state.registrations.get(chunk);
        let explicit = registration
            .and_then(|r| r.flag.clone())
            .or_else(|| self.chunk_flags.get(chunk).cloned());
        let flag = match explicit {
            Some(flag) => flag,
            None if self.flags.is_registered(chunk) => chunk.to_string(),
            None => return Gate::Open,
        };
        if self.flags.is_enabled(&flag, &self.session) {
            return Gate::Open;
        }
        let fallback = registration
            .and_then(|r| r.fallback.clone())
            .unwrap_or_else(|| Arc::clone(&self.fallback));
        Gate::Closed { flag, fallback }
    }

    /// Clear the pending slot and cache a successful module.
    fn settle(&self, chunk: &str, result: &Result<Arc<M>, LoadError>) {
        let mut state = self.lock();
        state.pending.remove(chunk);
        if let Ok(module) = result {
            state.ready.insert(chunk.to_string(), Arc::clone(module));
        }
    }
}

/// Clears the pending slot if a load task ends without settling.
struct LoadGuard<M> {
    inner: Weak<LoaderInner<M>>,
    chunk: String,
    settled: bool,
}

impl<M> Drop for LoadGuard<M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().pending.remove(&self.chunk);
            warn!(chunk = %self.chunk, "Chunk load task ended without settling");
        }
    }
}

/// Loads UI chunks on demand.
///
/// At most one load per chunk name is in flight; concurrent callers share it
/// and receive the same `Arc`. Successful modules are cached until
/// [`evict`](Self::evict)ed; exhausted loads are not, so the next call starts
/// over.
pub struct DynamicModuleLoader<M> {
    inner: Arc<LoaderInner<M>>,
}

impl<M> Clone for DynamicModuleLoader<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for DynamicModuleLoader<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DynamicModuleLoader")
            .field("session", &self.inner.session)
            .field("ready", &state.ready.len())
            .field("pending", &state.pending.len())
            .field("max_attempts", &self.inner.max_attempts)
            .finish()
    }
}

impl<M: Send + Sync + 'static> DynamicModuleLoader<M> {
    pub fn new(
        flags: Arc<FeatureFlagEngine>,
        monitor: Arc<PerformanceMonitor>,
        session: SessionId,
        config: &LoaderConfig,
        fallback: M,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                flags,
                monitor,
                session,
                backoff: Backoff::from_config(config),
                max_attempts: config.max_attempts.max(1),
                chunk_flags: config.chunks.clone(),
                fallback: Arc::new(fallback),
                state: Mutex::new(LoaderState {
                    ready: HashMap::new(),
                    pending: HashMap::new(),
                    registrations: HashMap::new(),
                }),
            }),
        }
    }

    /// Set the gating flag and fallback for `chunk`, replacing any earlier
    /// registration.
    pub fn register_chunk(
        &self,
        chunk: &str,
        registration: ChunkRegistration<M>,
    ) -> Result<(), LoadError> {
        validate_chunk(chunk)?;
        debug!(chunk, flag = ?registration.flag, "Chunk registered");
        self.inner
            .lock()
            .registrations
            .insert(chunk.to_string(), registration);
        Ok(())
    }

    /// Load `chunk`, or return it from cache.
    ///
    /// If the chunk is gated by a disabled flag, its fallback is returned
    /// without invoking `loader`. Otherwise `loader` runs up to
    /// `max_attempts` times with backoff in between, and every attempt is
    /// recorded with the performance monitor.
    pub async fn load_chunk<L>(&self, chunk: &str, loader: L) -> Result<Arc<M>, LoadError>
    where
        L: ChunkLoader<M> + 'static,
    {
        validate_chunk(chunk)?;

        let pending = {
            let mut state = self.inner.lock();
            if let Some(module) = state.ready.get(chunk) {
                debug!(chunk, "Chunk served from cache");
                return Ok(Arc::clone(module));
            }
            let existing = state.pending.get(chunk).cloned();
            match existing {
                Some(pending) => {
                    debug!(chunk, "Joining in-flight chunk load");
                    pending
                }
                None => match self.inner.gate(&state, chunk) {
                    Gate::Closed { flag, fallback } => {
                        info!(chunk, flag = %flag, "Chunk disabled by flag, serving fallback");
                        return Ok(fallback);
                    }
                    Gate::Open => {
                        let pending = self.start_load(chunk, loader);
                        state.pending.insert(chunk.to_string(), pending.clone());
                        pending
                    }
                },
            }
        };

        pending.await
    }

    fn start_load<L>(&self, chunk: &str, loader: L) -> PendingLoad<M>
    where
        L: ChunkLoader<M> + 'static,
    {
        let monitor = Arc::clone(&self.inner.monitor);
        let backoff = self.inner.backoff;
        let max_attempts = self.inner.max_attempts;
        let mut guard = LoadGuard {
            inner: Arc::downgrade(&self.inner),
            chunk: chunk.to_string(),
            settled: false,
        };

        // Retries keep running when every caller stops waiting.
        let task = tokio::spawn(async move {
            let result = run_attempts(&guard.chunk, &loader, &monitor, backoff, max_attempts).await;
            guard.settled = true;
            if let Some(inner) = Weak::upgrade(&guard.inner) {
                inner.settle(&guard.chunk, &result);
            }
            result
        });
        let chunk = chunk.to_string();
        task.map(move |joined| {
            joined.unwrap_or_else(|error| {
                Err(LoadError::Aborted {
                    chunk,
                    reason: error.to_string(),
                })
            })
        })
        .boxed()
        .shared()
    }

    pub fn is_loaded(&self, chunk: &str) -> bool {
        self.inner.lock().ready.contains_key(chunk)
    }

    /// Drop a cached module so the next load fetches it again.
    pub fn evict(&self, chunk: &str) -> bool {
        self.inner.lock().ready.remove(chunk).is_some()
    }

    /// Names of cached chunks, sorted.
    pub fn loaded_chunks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().ready.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn session(&self) -> &SessionId {
        &self.inner.session
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.monitor
    }
}

async fn run_attempts<M, L>(
    chunk: &str,
    loader: &L,
    monitor: &PerformanceMonitor,
    backoff: Backoff,
    max_attempts: u32,
) -> Result<Arc<M>, LoadError>
where
    L: ChunkLoader<M>,
{
    let mut attempt = 1;
    loop {
        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = loader.load().await;
        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(module) => {
                monitor.record(ChunkLoadRecord {
                    chunk_name: chunk.to_string(),
                    started_at,
                    duration_ms,
                    success: true,
                    error: None,
                });
                info!(chunk, attempt, duration_ms, "Chunk loaded");
                return Ok(Arc::new(module));
            }
            Err(error) => {
                monitor.record(ChunkLoadRecord {
                    chunk_name: chunk.to_string(),
                    started_at,
                    duration_ms,
                    success: false,
                    error: Some(error.to_string()),
                });
                if attempt >= max_attempts {
                    warn!(chunk, attempts = attempt, error = %error, "Chunk load exhausted retries");
                    return Err(LoadError::Exhausted {
                        chunk: chunk.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                let delay = backoff.delay(attempt);
                warn!(
                    chunk,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Chunk load failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn validate_chunk(chunk: &str) -> Result<(), LoadError> {
    if chunk.is_empty() {
        return Err(LoadError::InvalidArgument {
            field: "chunk",
            reason: "chunk name must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stride_core::RemoteError;
    use stride_flags::{FeatureFlag, FlagRegistry};

    fn policy() -> LoaderConfig {
        LoaderConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
            jitter_ms: 0,
            chunks: BTreeMap::new(),
        }
    }

    fn loader_with(flags: FlagRegistry) -> DynamicModuleLoader<&'static str> {
        DynamicModuleLoader::new(
            Arc::new(FeatureFlagEngine::new(flags, "production")),
            Arc::new(PerformanceMonitor::new().unwrap()),
            SessionId::new("session-1").unwrap(),
            &policy(),
            "fallback",
        )
    }

    fn flag(name: &str, enabled: bool) -> FeatureFlag {
        FeatureFlag {
            name: name.to_string(),
            enabled,
            environments: BTreeSet::from(["production".to_string()]),
            rollout_percentage: 100.0,
        }
    }

    #[tokio::test]
    async fn test_ungated_chunk_loads_and_caches() {
        let loader = loader_with(FlagRegistry::new());
        let first = loader
            .load_chunk("results-panel", || async { Ok::<_, RemoteError>("results") })
            .await
            .unwrap();
        let second = loader
            .load_chunk("results-panel", || async { Ok::<_, RemoteError>("other") })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, "results");
        assert_eq!(loader.loaded_chunks(), vec!["results-panel".to_string()]);
        assert_eq!(loader.monitor().summary("results-panel").unwrap().loads, 1);
    }

    #[tokio::test]
    async fn test_disabled_flag_serves_fallback_without_loading() {
        let mut registry = FlagRegistry::new();
        registry.insert(flag("roster-editor", false));
        let loader = loader_with(registry);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let module = loader
            .load_chunk("roster-editor", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RemoteError>("editor")
                }
            })
            .await
            .unwrap();

        assert_eq!(*module, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!loader.is_loaded("roster-editor"));
        assert!(loader.monitor().metrics().is_empty());
    }

    #[tokio::test]
    async fn test_registration_fallback_wins() {
        let mut registry = FlagRegistry::new();
        registry.insert(flag("live-leaderboard", false));
        let loader = loader_with(registry);
        loader
            .register_chunk(
                "leaderboard-panel",
                ChunkRegistration::new()
                    .gated_by("live-leaderboard")
                    .with_fallback("static leaderboard"),
            )
            .unwrap();

        let module = loader
            .load_chunk("leaderboard-panel", || async { Ok::<_, RemoteError>("live") })
            .await
            .unwrap();
        assert_eq!(*module, "static leaderboard");
    }

    #[tokio::test]
    async fn test_enabled_flag_loads() {
        let mut registry = FlagRegistry::new();
        registry.insert(flag("draft-board", true));
        let loader = loader_with(registry);
        let module = loader
            .load_chunk("draft-board", || async { Ok::<_, RemoteError>("board") })
            .await
            .unwrap();
        assert_eq!(*module, "board");
    }

    #[tokio::test]
    async fn test_evict_forces_reload() {
        let loader = loader_with(FlagRegistry::new());
        loader
            .load_chunk("a", || async { Ok::<_, RemoteError>("v1") })
            .await
            .unwrap();
        assert!(loader.evict("a"));
        assert!(!loader.evict("a"));
        let module = loader
            .load_chunk("a", || async { Ok::<_, RemoteError>("v2") })
            .await
            .unwrap();
        assert_eq!(*module, "v2");
    }

    #[tokio::test]
    async fn test_empty_chunk_name_rejected() {
        let loader = loader_with(FlagRegistry::new());
        let err = loader
            .load_chunk("", || async { Ok::<_, RemoteError>("x") })
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidArgument { field: "chunk", .. }));
        assert!(loader.register_chunk("", ChunkRegistration::new()).is_err());
    }
}
