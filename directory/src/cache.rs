//! Users and channels directory behind one readiness contract.
//!
//! Handlers call [`DirectoryCache::ensure_ready`] (or [`DirectoryCache::is_ready`])
//! before touching cached data, then read through [`DirectoryCache::users`] /
//! [`DirectoryCache::channels`] or the `resolve_*` helpers. Reads never block
//! and never see a refresh error; only readiness does.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::DirectoryConfig,
    error::{DirectoryError, DirectoryResult},
    fetcher::{PageSource, PagedFetcher},
    limiter::RateLimiter,
    refresh::{RefreshCoordinator, RefreshState, RefreshStatus},
    retry::RetryPolicy,
    snapshot::{ChannelIndexBuilder, IndexBuilder, Snapshot},
    store::SnapshotStore,
    types::{Channel, Dataset, DirectoryEntry, User},
};

/// Point-in-time view of one dataset for logs and health output.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStats {
    pub dataset: Dataset,
    pub state: RefreshState,
    pub ready: bool,
    pub entries: usize,
    pub aliases: usize,
    pub generation: u64,
    pub failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub users: DatasetStats,
    pub channels: DatasetStats,
}

pub struct DirectoryCache {
    config: DirectoryConfig,
    limiter: Arc<RateLimiter>,
    users: RefreshCoordinator<User>,
    channels: RefreshCoordinator<Channel>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryCache {
    /// Build a cache with its own rate limiter from `config.rate_limit`.
    pub fn new(
        config: DirectoryConfig,
        users_source: Arc<dyn PageSource<User>>,
        channels_source: Arc<dyn PageSource<Channel>>,
    ) -> DirectoryResult<Self> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Self::with_limiter(config, limiter, users_source, channels_source)
    }

    /// Build a cache whose refreshes draw from an existing limiter, so other
    /// callers of the same upstream share one request budget with it.
    pub fn with_limiter(
        config: DirectoryConfig,
        limiter: Arc<RateLimiter>,
        users_source: Arc<dyn PageSource<User>>,
        channels_source: Arc<dyn PageSource<Channel>>,
    ) -> DirectoryResult<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let max_pages = config.refresh.max_pages;
        let attempt_timeout = config.refresh.attempt_timeout();

        let users_store = Arc::new(SnapshotStore::new());
        let users = RefreshCoordinator::new(
            PagedFetcher::new(users_source, Arc::clone(&limiter), max_pages),
            Arc::new(IndexBuilder),
            Arc::clone(&users_store),
            attempt_timeout,
            shutdown.child_token(),
        );
        let channels = RefreshCoordinator::new(
            PagedFetcher::new(channels_source, Arc::clone(&limiter), max_pages),
            Arc::new(ChannelIndexBuilder::new(users_store)),
            Arc::new(SnapshotStore::new()),
            attempt_timeout,
            shutdown.child_token(),
        );

        Ok(Self {
            config,
            limiter,
            users,
            channels,
            shutdown,
            supervisor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Shared request budget for everything talking to the upstream.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Kick off the initial refreshes and the periodic schedulers.
    ///
    /// Users are loaded before channels so direct messages can be named after
    /// their peer. Returns immediately; use [`wait_ready`](Self::wait_ready)
    /// to block on the outcome. Calling it again is a no-op.
    pub fn start(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            warn!("Directory cache already started");
            return;
        }

        let users = self.users.clone();
        let channels = self.channels.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.config.refresh.interval();
        let policy = RetryPolicy::from_config(&self.config.refresh);

        info!(
            interval_secs = interval.as_secs(),
            requests_per_minute = self.limiter.config().requests_per_minute,
            burst = self.limiter.config().burst,
            "Starting directory cache"
        );

        *supervisor = Some(tokio::spawn(async move {
            // Failures are recorded in each dataset's status; the schedulers
            // retry them with backoff.
            let users_loaded = match users.refresh(&shutdown).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Initial users refresh did not succeed");
                    false
                }
            };
            if let Err(e) = channels.refresh(&shutdown).await {
                debug!(error = %e, "Initial channels refresh did not succeed");
            }
            if shutdown.is_cancelled() {
                return;
            }

            let users_scheduler = users.spawn_scheduler(interval, policy);
            let channels_scheduler = channels.spawn_scheduler(interval, policy);
            if !users_loaded {
                rename_direct_messages(&users, &channels, &shutdown).await;
            }
            let _ = tokio::join!(users_scheduler, channels_scheduler);
        }));
    }

    /// Wait until both datasets are ready.
    ///
    /// Fails fast with [`DirectoryError::InitialRefreshFailed`] when a first
    /// attempt fails, and with [`DirectoryError::Timeout`] at the deadline.
    pub async fn wait_ready(&self, timeout: Duration) -> DirectoryResult<()> {
        let wait = async {
            wait_dataset(&self.users).await?;
            wait_dataset(&self.channels).await
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(timeout)),
        }
    }

    /// `Ok(true)` once both datasets completed their first refresh.
    ///
    /// `Err` carries the most recent first-refresh failure of a dataset that
    /// is still not ready; `Ok(false)` means the first refresh is pending.
    /// Once `Ok(true)` is returned it is returned for the cache's lifetime.
    pub fn is_ready(&self) -> Result<bool, DirectoryError> {
        let users = self.users.status();
        let channels = self.channels.status();
        if users.ready && channels.ready {
            return Ok(true);
        }

        for (dataset, status) in [(Dataset::Users, &users), (Dataset::Channels, &channels)] {
            if let Some(err) = status.initial_error() {
                return Err(initial_failure(dataset, err));
            }
        }
        Ok(false)
    }

    /// Handler guard: `Ok` when cached data may be used.
    pub fn ensure_ready(&self) -> DirectoryResult<()> {
        match self.is_ready()? {
            true => Ok(()),
            false if !self.users.is_ready() => Err(DirectoryError::NotReady(Dataset::Users)),
            false => Err(DirectoryError::NotReady(Dataset::Channels)),
        }
    }

    pub fn is_dataset_ready(&self, dataset: Dataset) -> bool {
        match dataset {
            Dataset::Users => self.users.is_ready(),
            Dataset::Channels => self.channels.is_ready(),
        }
    }

    pub fn status(&self, dataset: Dataset) -> RefreshStatus {
        match dataset {
            Dataset::Users => self.users.status(),
            Dataset::Channels => self.channels.status(),
        }
    }

    /// Current users snapshot; empty until the first publish.
    pub fn users(&self) -> Arc<Snapshot<User>> {
        self.users.store().load()
    }

    /// Current channels snapshot; empty until the first publish.
    pub fn channels(&self) -> Arc<Snapshot<Channel>> {
        self.channels.store().load()
    }

    /// Canonical user id for an id, `@handle` or email; unknown tokens pass through.
    pub fn resolve_user(&self, token: &str) -> String {
        self.users().resolve(token).to_string()
    }

    /// Canonical conversation id for an id, `#name` or `@handle` (direct
    /// message); unknown tokens pass through.
    pub fn resolve_channel(&self, token: &str) -> String {
        self.channels().resolve(token).to_string()
    }

    /// Request a refresh without waiting. `true` when a new attempt started.
    pub fn refresh(&self, dataset: Dataset) -> bool {
        match dataset {
            Dataset::Users => self.users.trigger(),
            Dataset::Channels => self.channels.trigger(),
        }
    }

    /// Refresh (or join the running refresh) and wait for its outcome.
    pub async fn refresh_and_wait(
        &self,
        dataset: Dataset,
        cancel: &CancellationToken,
    ) -> DirectoryResult<()> {
        match dataset {
            Dataset::Users => self.users.refresh(cancel).await,
            Dataset::Channels => self.channels.refresh(cancel).await,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            users: dataset_stats(&self.users),
            channels: dataset_stats(&self.channels),
        }
    }

    /// Stop the schedulers and abandon any in-flight refresh.
    ///
    /// Snapshots stay readable after shutdown.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!(error = %e, "Directory cache supervisor ended abnormally");
            }
        }
        info!("Directory cache stopped");
    }
}

impl Drop for DirectoryCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn wait_dataset<E: DirectoryEntry>(
    coordinator: &RefreshCoordinator<E>,
) -> DirectoryResult<()> {
    let mut rx = coordinator.subscribe();
    let status = match rx
        .wait_for(|s| s.ready || (s.state == RefreshState::Idle && s.last_error.is_some()))
        .await
    {
        Ok(status) => status.clone(),
        Err(_) => return Err(DirectoryError::Cancelled),
    };

    match status.initial_error() {
        Some(err) => Err(initial_failure(E::DATASET, err)),
        None => Ok(()),
    }
}

/// Rebuild channels once users first load, so direct messages indexed
/// without a users snapshot get their `@handle` aliases.
async fn rename_direct_messages(
    users: &RefreshCoordinator<User>,
    channels: &RefreshCoordinator<Channel>,
    shutdown: &CancellationToken,
) {
    let mut rx = users.subscribe();
    let ready = tokio::select! {
        _ = shutdown.cancelled() => false,
        status = rx.wait_for(|s| s.ready) => status.is_ok(),
    };
    if !ready {
        return;
    }

    info!("Users loaded after channels, refreshing channels to name direct messages");
    if let Err(e) = channels.refresh(shutdown).await {
        debug!(error = %e, "Channels refresh after users recovery did not succeed");
    }
}

fn initial_failure(dataset: Dataset, err: &DirectoryError) -> DirectoryError {
    DirectoryError::InitialRefreshFailed {
        dataset,
        source: Box::new(err.clone()),
    }
}

fn dataset_stats<E: DirectoryEntry>(coordinator: &RefreshCoordinator<E>) -> DatasetStats {
    let status = coordinator.status();
    let snapshot = coordinator.store().load();
    DatasetStats {
        dataset: E::DATASET,
        state: status.state,
        ready: status.ready,
        entries: snapshot.len(),
        aliases: snapshot.by_alias().len(),
        generation: snapshot.generation(),
        failures: status.failures,
        last_success: status.last_success,
    }
}
