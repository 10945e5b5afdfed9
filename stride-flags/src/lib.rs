//! Stride Flags - feature flag evaluation
//!
//! Flags are loaded once from the configuration registry and evaluated
//! deterministically per session: the same flag and session always land in
//! the same rollout bucket, on every process and platform. Session-scoped
//! overrides sit on top of the computed result.

pub mod bucket;
pub mod engine;
pub mod registry;

pub use bucket::bucket;
pub use engine::{FeatureFlagEngine, FlagOverride, FlagSnapshot};
pub use registry::{FeatureFlag, FlagRegistry, RegisteredFlag};
