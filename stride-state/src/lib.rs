//! Stride State - remote-state cache for UI consumers
//!
//! One [`StateManager`] owns every cached value, addressed by caller-built
//! keys such as `"rankings:{game_id}:{player_code}"`. It guarantees at most
//! one in-flight fetch per key, serves stale values while revalidating in the
//! background, and rolls optimistic writes back exactly when the remote call
//! fails.
//!
//! # Staleness is explicit
//!
//! Reads return [`CacheRead<V>`], which carries the entry status, version and
//! the last fetch error. A failed refresh never hides the last good value:
//!
//! ```ignore
//! let read = state.get("rankings:42:ABC", fetch_rankings, GetOptions::default()).await?;
//! if let Some(err) = read.error() {
//!     show_retry_banner(err);
//! }
//! render(read.value());
//! ```

pub mod entry;
pub mod freshness;
pub mod manager;
pub mod pattern;
pub mod stats;

pub use entry::{CacheSnapshot, CacheStatus};
pub use freshness::CacheRead;
pub use manager::{GetOptions, Notification, StateManager, SubscriptionId, Unsubscribe};
pub use pattern::KeyPattern;
pub use stats::CacheStats;
