//! Stride Test Utilities
//!
//! Shared test infrastructure for the Stride workspace:
//! - Counting and scripted fetchers (also usable as chunk loaders)
//! - Configuration fixtures
//! - Proptest generators for keys, flags and sessions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
pub use stride_core::{Fetcher, RemoteError, RuntimeConfig, SessionId};

// ============================================================================
// FETCHERS
// ============================================================================

/// Returns the same value on every call, optionally after a delay, and counts
/// how often it was invoked. Clones share the counter.
#[derive(Debug, Clone)]
pub struct CountingFetcher<T> {
    value: T,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone + Send + Sync + 'static> CountingFetcher<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            delay: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Sleep for `delay` (tokio time) before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Fetcher<T> for CountingFetcher<T> {
    async fn fetch(&self) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.value.clone())
    }
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct Step<T> {
    pub delay: Duration,
    pub result: Result<T, RemoteError>,
}

impl<T> Step<T> {
    pub fn ok(value: T) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    pub fn err(reason: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(RemoteError::new(reason)),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Plays back a fixed sequence of responses; the last step repeats once the
/// script runs out. Clones share the script and the counter.
#[derive(Debug, Clone)]
pub struct ScriptedFetcher<T> {
    script: Arc<Mutex<VecDeque<Step<T>>>>,
    last: Arc<Mutex<Option<Step<T>>>>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone + Send + Sync + 'static> ScriptedFetcher<T> {
    pub fn new(steps: impl IntoIterator<Item = Step<T>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<Step<T>> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match next {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Fetcher<T> for ScriptedFetcher<T> {
    async fn fetch(&self) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(step) = self.next_step() else {
            return Err(RemoteError::new("script is empty"));
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A complete configuration exercising every section.
pub const SAMPLE_CONFIG_TOML: &str = r#"
environment = "production"

[cache]
default_ttl_ms = 30000

[cache.resources]
results = 15000
game-state = 5000
athletes = 300000
rankings = 1000

[loader]
max_attempts = 3
initial_backoff_ms = 100
max_backoff_ms = 2000
multiplier = 2.0

[loader.chunks]
leaderboard-panel = "live-leaderboard"

[logging]
level = "info"

[flags.live-leaderboard]
enabled = true
environments = ["production", "staging"]
rollout_percentage = 100.0

[flags.draft-board]
enabled = true
environments = ["production"]
rollout_percentage = 30.0

[flags.roster-editor]
enabled = false
environments = ["production"]
rollout_percentage = 100.0

[flags.staging-only]
enabled = true
environments = ["staging"]
rollout_percentage = 100.0
"#;

/// Parsed and validated [`SAMPLE_CONFIG_TOML`].
pub fn sample_config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(SAMPLE_CONFIG_TOML).expect("sample config is valid")
}

/// A session id that is always valid.
pub fn session(id: &str) -> SessionId {
    SessionId::new(id).expect("fixture session id is non-empty")
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;

    /// Resource names as used in cache keys.
    pub fn arb_resource() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "athletes",
            "results",
            "rankings",
            "rosters",
            "game-state",
        ])
        .prop_map(str::to_string)
    }

    /// Keys shaped like `"{resource}:{game}:{player}"`.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        (arb_resource(), 1u32..500, "[A-Z]{3}")
            .prop_map(|(resource, game, player)| format!("{resource}:{game}:{player}"))
    }

    pub fn arb_flag_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,23}"
    }

    pub fn arb_session_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9-]{1,36}"
    }

    pub fn arb_rollout() -> impl Strategy<Value = f64> {
        0.0f64..=100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counting_fetcher_counts_clones_together() {
        let fetcher = CountingFetcher::new(3u32);
        let clone = fetcher.clone();
        assert_eq!(fetcher.fetch().await, Ok(3));
        assert_eq!(clone.fetch().await, Ok(3));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_fetcher_repeats_last_step() {
        let fetcher = ScriptedFetcher::new([Step::err("first"), Step::ok(1u32)]);
        assert_eq!(fetcher.fetch().await, Err(RemoteError::new("first")));
        assert_eq!(fetcher.fetch().await, Ok(1));
        assert_eq!(fetcher.fetch().await, Ok(1));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let fetcher: ScriptedFetcher<u32> = ScriptedFetcher::new([]);
        assert!(fetcher.fetch().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_step_waits() {
        let fetcher = ScriptedFetcher::new([Step::ok(1u32).after(Duration::from_millis(100))]);
        let start = tokio::time::Instant::now();
        fetcher.fetch().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = sample_config();
        assert_eq!(config.environment, "production");
        assert_eq!(config.flags.len(), 4);
        assert_eq!(
            config.cache.ttl_for_key("rankings:1:ABC"),
            Duration::from_millis(1000)
        );
    }
}
