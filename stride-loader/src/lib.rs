//! Stride Loader - lazily loaded UI chunks
//!
//! [`DynamicModuleLoader`] loads named chunks at most once at a time, gates
//! them behind feature flags with a fallback module, retries failures with
//! exponential backoff, and records every attempt with the performance
//! monitor. Loaded modules are cached; failures are not.

pub mod backoff;
pub mod chunk;
pub mod loader;

pub use backoff::Backoff;
pub use chunk::{ChunkLoader, ChunkRegistration};
pub use loader::DynamicModuleLoader;
