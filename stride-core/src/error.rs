//! Error types for Stride operations

use thiserror::Error;

/// Failure reported by a collaborator-supplied fetcher, remote call or loader.
///
/// Kept as a plain message so it can be cloned to every waiter of a shared
/// in-flight operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct RemoteError {
    pub reason: String,
}

impl RemoteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<&str> for RemoteError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for RemoteError {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

/// State manager errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Fetch failed for {key}: {source}")]
    Fetch { key: String, source: RemoteError },

    #[error("Mutation of {key} rolled back: {source}")]
    Rollback { key: String, source: RemoteError },

    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
}

impl StateError {
    /// The remote failure behind a fetch or rollback, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Fetch { source, .. } | Self::Rollback { source, .. } => Some(source),
            Self::InvalidArgument { .. } => None,
        }
    }
}

/// Dynamic chunk loading errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Chunk {chunk} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        chunk: String,
        attempts: u32,
        source: RemoteError,
    },

    #[error("Chunk {chunk} load task ended early: {reason}")]
    Aborted { chunk: String, reason: String },

    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
}

/// Feature flag call-site errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlagError {
    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
}

/// A malformed flag registry entry. Logged and surfaced for introspection,
/// never returned from evaluation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlagConfigError {
    #[error("Flag {flag} must be a table")]
    NotATable { flag: String },

    #[error("Flag {flag} is malformed: {reason}")]
    Malformed { flag: String, reason: String },

    #[error("Flag {flag} has invalid {field}: {reason}")]
    InvalidValue {
        flag: String,
        field: &'static str,
        reason: String,
    },
}

/// Telemetry export and initialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Metrics registry error: {reason}")]
    Registry { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Tracing subscriber init failed: {reason}")]
    SubscriberInit { reason: String },
}

/// Master error type for all Stride errors.
#[derive(Debug, Error)]
pub enum StrideError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Flag error: {0}")]
    Flag(#[from] FlagError),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Result type alias for Stride operations.
pub type StrideResult<T> = Result<T, StrideError>;
