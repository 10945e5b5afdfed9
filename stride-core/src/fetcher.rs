//! The capability the API layer hands to the runtime: a nullary async
//! operation producing a value or a `RemoteError`.

use std::future::Future;

use async_trait::async_trait;

use crate::error::RemoteError;

/// A nullary operation returning a future of `T`.
///
/// Used for cache fetchers and `mutate` remote calls. Any
/// `Fn() -> impl Future<Output = Result<T, RemoteError>>` closure qualifies,
/// so collaborators rarely implement this by hand.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, RemoteError>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, RemoteError>> + Send,
    T: Send + 'static,
{
    async fn fetch(&self) -> Result<T, RemoteError> {
        (self)().await
    }
}
