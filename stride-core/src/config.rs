//! Static runtime configuration.
//!
//! Read once at startup from a TOML file. Fixed sections reject unknown
//! fields; the `[flags]` table is kept raw so a single malformed flag cannot
//! prevent the rest of the registry from loading.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `--config` is not passed.
pub const CONFIG_ENV_VAR: &str = "STRIDE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Runtime environment flags are matched against (e.g. "production").
    pub environment: String,
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Raw flag registry, parsed entry by entry by the flag engine.
    #[serde(default)]
    pub flags: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// TTL for keys whose resource has no entry in `resources`.
    pub default_ttl_ms: u64,
    /// Resource name -> TTL in milliseconds. Zero means never cache.
    #[serde(default)]
    pub resources: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Total attempts per load, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_ms: u64,
    /// Chunk name -> flag name, for chunks not gated by a same-named flag.
    #[serde(default)]
    pub chunks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or STRIDE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl RuntimeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.trim().is_empty() {
            return Err(invalid("environment", "must not be empty"));
        }
        for name in self.cache.resources.keys() {
            if name.trim().is_empty() || name.contains(':') {
                return Err(invalid(
                    format!("cache.resources.{}", name),
                    "resource names must be non-empty and contain no ':'",
                ));
            }
        }
        if self.loader.max_attempts == 0 {
            return Err(invalid("loader.max_attempts", "must be > 0"));
        }
        if self.loader.max_backoff_ms < self.loader.initial_backoff_ms {
            return Err(invalid(
                "loader.max_backoff_ms",
                "must be >= loader.initial_backoff_ms",
            ));
        }
        if !self.loader.multiplier.is_finite() || self.loader.multiplier < 1.0 {
            return Err(invalid("loader.multiplier", "must be >= 1.0"));
        }
        for (chunk, flag) in &self.loader.chunks {
            if chunk.trim().is_empty() || flag.trim().is_empty() {
                return Err(invalid(
                    "loader.chunks",
                    "chunk and flag names must not be empty",
                ));
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

impl CacheConfig {
    /// Resource name of a cache key: the segment before the first `:`.
    pub fn resource_of(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }

    /// TTL applying to `key` according to the resource table.
    pub fn ttl_for_key(&self, key: &str) -> Duration {
        let ms = self
            .resources
            .get(Self::resource_of(key))
            .copied()
            .unwrap_or(self.default_ttl_ms);
        Duration::from_millis(ms)
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
