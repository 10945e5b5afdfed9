//! Stride Runtime - composition root
//!
//! Builds exactly one of each service from a [`RuntimeConfig`] and a session:
//! the flag engine, the performance monitor, the state manager and the chunk
//! loader. Nothing here is global; embedders own the [`Runtime`] and hand out
//! references.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use stride_core::{RuntimeConfig, SessionId, StrideResult};
use stride_flags::{FeatureFlagEngine, FlagSnapshot};
use stride_loader::DynamicModuleLoader;
use stride_state::{CacheStats, StateManager};
use stride_telemetry::{init_tracing, ChunkSummary, PerformanceMonitor, TracingConfig};
use tracing::info;

pub use stride_core::{CacheConfig, LoaderConfig, LoggingConfig, StrideError};

/// The four services of one running client, sharing one session.
pub struct Runtime<M, V = serde_json::Value> {
    config: RuntimeConfig,
    session: SessionId,
    flags: Arc<FeatureFlagEngine>,
    monitor: Arc<PerformanceMonitor>,
    state: StateManager<V>,
    loader: DynamicModuleLoader<M>,
}

/// Point-in-time view of a runtime, for tooling.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub environment: String,
    pub session: SessionId,
    pub flags: Vec<FlagSnapshot>,
    pub default_ttl_ms: u64,
    pub resource_ttls_ms: BTreeMap<String, u64>,
    pub loaded_chunks: Vec<String>,
    pub chunk_summaries: Vec<ChunkSummary>,
    pub cache: CacheStats,
}

impl<M, V> Runtime<M, V>
where
    M: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wire the services. `fallback` is served for flag-disabled chunks that
    /// have no fallback of their own.
    pub fn new(config: RuntimeConfig, session: SessionId, fallback: M) -> StrideResult<Self> {
        let flags = Arc::new(FeatureFlagEngine::from_config(&config));
        let monitor = Arc::new(PerformanceMonitor::new()?);
        let state = StateManager::new(config.cache.clone());
        let loader = DynamicModuleLoader::new(
            Arc::clone(&flags),
            Arc::clone(&monitor),
            session.clone(),
            &config.loader,
            fallback,
        );
        info!(
            environment = %config.environment,
            session = %session,
            flags = flags.registry().len(),
            "Runtime initialized"
        );
        Ok(Self {
            config,
            session,
            flags,
            monitor,
            state,
            loader,
        })
    }

    /// Load configuration from `--config` or `STRIDE_CONFIG` and start a fresh
    /// session.
    pub fn from_env(fallback: M) -> StrideResult<Self> {
        let config = RuntimeConfig::load()?;
        Self::new(config, SessionId::generate(), fallback)
    }

    /// Install the global tracing subscriber from the `[logging]` section.
    pub fn init_tracing(&self) -> StrideResult<()> {
        init_tracing(&TracingConfig::from(&self.config.logging))?;
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn flags(&self) -> &Arc<FeatureFlagEngine> {
        &self.flags
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn state(&self) -> &StateManager<V> {
        &self.state
    }

    pub fn loader(&self) -> &DynamicModuleLoader<M> {
        &self.loader
    }

    pub fn report(&self) -> RuntimeReport {
        RuntimeReport {
            environment: self.config.environment.clone(),
            session: self.session.clone(),
            flags: self.flags.get_all(&self.session),
            default_ttl_ms: self.config.cache.default_ttl_ms,
            resource_ttls_ms: self.config.cache.resources.clone(),
            loaded_chunks: self.loader.loaded_chunks(),
            chunk_summaries: self.monitor.summaries(),
            cache: self.state.stats(),
        }
    }
}
