//! Chunk loading capability and per-chunk registration.

use std::sync::Arc;

use async_trait::async_trait;
use stride_core::{Fetcher, RemoteError};

/// Produces a module for a chunk.
///
/// Every [`Fetcher<M>`] is a chunk loader, so plain async closures work:
///
/// ```ignore
/// loader.load_chunk("draft-board", || async { Ok(DraftBoard::new()) }).await?;
/// ```
#[async_trait]
pub trait ChunkLoader<M>: Send + Sync {
    async fn load(&self) -> Result<M, RemoteError>;
}

#[async_trait]
impl<M, F> ChunkLoader<M> for F
where
    F: Fetcher<M>,
    M: Send + 'static,
{
    async fn load(&self) -> Result<M, RemoteError> {
        self.fetch().await
    }
}

/// How a chunk is gated and what it falls back to.
#[derive(Debug)]
pub struct ChunkRegistration<M> {
    /// Flag gating the chunk. Without one, a flag named like the chunk gates
    /// it if such a flag is registered.
    pub flag: Option<String>,
    /// Served when the flag is off. Defaults to the loader-wide fallback.
    pub fallback: Option<Arc<M>>,
}

impl<M> ChunkRegistration<M> {
    pub fn new() -> Self {
        Self {
            flag: None,
            fallback: None,
        }
    }

    pub fn gated_by(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    pub fn with_fallback(mut self, fallback: M) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

impl<M> Default for ChunkRegistration<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for ChunkRegistration<M> {
    fn clone(&self) -> Self {
        Self {
            flag: self.flag.clone(),
            fallback: self.fallback.clone(),
        }
    }
}
