//! Stride Core - shared types for the client runtime
//!
//! Holds the pieces every other stride crate agrees on: the error taxonomy,
//! the `Fetcher` capability handed in by the API layer, session identifiers,
//! and the static configuration read once at startup.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod session;

pub use config::{
    CacheConfig, ConfigError, LoaderConfig, LoggingConfig, RuntimeConfig, CONFIG_ENV_VAR,
};
pub use error::{
    FlagConfigError, FlagError, LoadError, RemoteError, StateError, StrideError, StrideResult,
    TelemetryError,
};
pub use fetcher::Fetcher;
pub use session::SessionId;
