//! Snapshot cache of a Slack workspace directory.
//!
//! Users and conversations are listed page by page from the upstream API,
//! indexed into immutable snapshots and swapped in atomically, so tool
//! handlers resolve `@handle`, `#channel` and email tokens without blocking on
//! the network. All outbound listing calls share one token-bucket budget.
//!
//! ## Modules
//!
//! - [`cache`]: [`DirectoryCache`] facade and its readiness contract
//! - [`refresh`]: single-flight refresh state machine per dataset
//! - [`fetcher`]: cursor pagination over a [`PageSource`]
//! - [`snapshot`] / [`store`]: immutable indexes and their atomic holder
//! - [`limiter`]: shared outbound [`RateLimiter`]
//! - [`upstream`]: Slack Web API page sources

// Shared types
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// Building blocks
pub mod fetcher;
pub mod limiter;
pub mod retry;
pub mod snapshot;
pub mod store;

// Subsystems
pub mod cache;
pub mod refresh;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::{CacheStats, DatasetStats, DirectoryCache};
pub use config::{DirectoryConfig, RateLimitConfig, RefreshConfig, SlackConfig};
pub use error::{DirectoryError, DirectoryResult};
pub use fetcher::{Page, PageSource, PagedFetcher};
pub use limiter::RateLimiter;
pub use refresh::{RefreshCoordinator, RefreshState, RefreshStatus};
pub use retry::RetryPolicy;
pub use snapshot::{ChannelIndexBuilder, IndexBuilder, Snapshot, SnapshotBuilder};
pub use store::SnapshotStore;
pub use types::{Alias, Aliases, Channel, ChannelKind, Dataset, DirectoryEntry, User};
pub use upstream::{AuthInfo, ConversationsSource, SlackClient, UsersSource};
