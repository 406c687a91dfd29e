//! Per-dataset refresh state machine.
//!
//! A [`RefreshCoordinator`] owns the write side of one [`SnapshotStore`]. At
//! most one attempt runs at a time: a trigger that arrives while an attempt is
//! in flight joins it instead of starting another. Attempts run in their own
//! task under the coordinator's shutdown token, so a caller that stops waiting
//! never aborts an attempt other callers are also waiting on.
//!
//! ```text
//! Idle ──trigger──▶ Refreshing ──ok──▶ Ready ◀──ok── Refreshing ◀──trigger── ReadyStale
//!   ▲                   │                 │                                     ▲
//!   └──first failure────┘                 └──trigger──▶ Refreshing ──failure────┘
//! ```
//!
//! Once a dataset is ready it stays ready; later failures only mark it stale.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DirectoryError, DirectoryResult},
    fetcher::PagedFetcher,
    metrics::{self, RefreshOutcome},
    retry::RetryPolicy,
    snapshot::SnapshotBuilder,
    store::SnapshotStore,
    types::{Dataset, DirectoryEntry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// No snapshot was ever published and no attempt is running.
    Idle,
    Refreshing,
    Ready,
    /// Ready, but the most recent attempt failed; the previous snapshot is served.
    ReadyStale,
}

impl RefreshState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshState::Idle => "idle",
            RefreshState::Refreshing => "refreshing",
            RefreshState::Ready => "ready",
            RefreshState::ReadyStale => "ready_stale",
        }
    }
}

impl std::fmt::Display for RefreshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshStatus {
    pub state: RefreshState,
    /// Set by the first successful publish and never cleared.
    pub ready: bool,
    /// Finished attempts, successful or not.
    pub completed: u64,
    /// Failed attempts since the last success.
    pub failures: u32,
    /// Cause of the most recent failure; cleared by a success.
    pub last_error: Option<DirectoryError>,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            state: RefreshState::Idle,
            ready: false,
            completed: 0,
            failures: 0,
            last_error: None,
            last_success: None,
        }
    }
}

impl RefreshStatus {
    pub fn is_stale(&self) -> bool {
        self.state == RefreshState::ReadyStale
    }

    /// First-attempt failure that keeps the dataset unavailable, if any.
    pub fn initial_error(&self) -> Option<&DirectoryError> {
        if self.ready {
            None
        } else {
            self.last_error.as_ref()
        }
    }
}

struct Inner<E> {
    fetcher: PagedFetcher<E>,
    builder: Arc<dyn SnapshotBuilder<E>>,
    store: Arc<SnapshotStore<E>>,
    status: watch::Sender<RefreshStatus>,
    attempt_timeout: Duration,
    shutdown: CancellationToken,
}

pub struct RefreshCoordinator<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for RefreshCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: DirectoryEntry> RefreshCoordinator<E> {
    pub fn new(
        fetcher: PagedFetcher<E>,
        builder: Arc<dyn SnapshotBuilder<E>>,
        store: Arc<SnapshotStore<E>>,
        attempt_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(RefreshStatus::default());
        Self {
            inner: Arc::new(Inner {
                fetcher,
                builder,
                store,
                status,
                attempt_timeout,
                shutdown,
            }),
        }
    }

    pub fn dataset(&self) -> Dataset {
        E::DATASET
    }

    pub fn store(&self) -> &Arc<SnapshotStore<E>> {
        &self.inner.store
    }

    pub fn status(&self) -> RefreshStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.status.borrow().ready
    }

    /// Start an attempt unless one is already running.
    ///
    /// Returns `true` when this call started the attempt. Does not wait for it.
    pub fn trigger(&self) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let claimed = self.inner.status.send_if_modified(|status| {
            if status.state == RefreshState::Refreshing {
                false
            } else {
                status.state = RefreshState::Refreshing;
                true
            }
        });
        if !claimed {
            debug!(dataset = %E::DATASET, "Refresh already in flight, joining it");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_attempt().await });
        true
    }

    /// Trigger an attempt (or join the running one) and wait for its outcome.
    ///
    /// Cancelling `cancel` stops this caller's wait only; the attempt keeps
    /// running for everyone else.
    pub async fn refresh(&self, cancel: &CancellationToken) -> DirectoryResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(DirectoryError::Cancelled);
        }

        let mut rx = self.subscribe();
        let seen = rx.borrow_and_update().completed;
        self.trigger();

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DirectoryError::Cancelled),
            status = rx.wait_for(|s| s.completed > seen) => match status {
                Ok(status) => status.clone(),
                Err(_) => return Err(DirectoryError::Cancelled),
            },
            // Shutdown may land after the check above, leaving nothing to wait on.
            _ = self.inner.shutdown.cancelled() => return Err(DirectoryError::Cancelled),
        };

        match status.last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run attempts every `interval` until shutdown.
    ///
    /// After a failure the next attempt comes sooner, following `policy`.
    pub fn spawn_scheduler(&self, interval: Duration, policy: RetryPolicy) -> JoinHandle<()> {
        let coordinator = self.clone();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            info!(
                dataset = %E::DATASET,
                interval_secs = interval.as_secs(),
                "Refresh scheduler started"
            );
            loop {
                // Let an attempt started elsewhere (e.g. at startup) finish
                // first so its outcome decides the next delay.
                let mut rx = coordinator.subscribe();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = rx.wait_for(|s| s.state != RefreshState::Refreshing) => {}
                }

                let status = coordinator.status();
                let mut delay = policy.next_delay(interval, status.failures);
                // The upstream's own Retry-After wins over a shorter backoff.
                if let Some(wait) = status
                    .last_error
                    .as_ref()
                    .and_then(DirectoryError::retry_after)
                {
                    delay = delay.max(wait);
                }
                if status.failures > 0 {
                    debug!(
                        dataset = %E::DATASET,
                        failures = status.failures,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying refresh after backoff"
                    );
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        // Outcome is recorded in the status and logged by the attempt.
                        let _ = coordinator.refresh(&shutdown).await;
                    }
                }
            }
            debug!(dataset = %E::DATASET, "Refresh scheduler shutting down");
        })
    }
}

impl<E: DirectoryEntry> Inner<E> {
    async fn run_attempt(&self) {
        let started = Instant::now();
        let fetch = self.fetcher.fetch_all(&self.shutdown);
        let result = match timeout(self.attempt_timeout, fetch).await {
            Ok(result) => result.map(|entries| self.builder.build(entries)),
            Err(_) => Err(DirectoryError::Timeout(self.attempt_timeout)),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(snapshot) => {
                let snapshot = self.store.publish(snapshot);
                metrics::record_refresh(E::DATASET, RefreshOutcome::Success, elapsed);
                metrics::record_snapshot(E::DATASET, snapshot.len(), snapshot.generation());

                self.status.send_modify(|status| {
                    status.state = RefreshState::Ready;
                    status.ready = true;
                    status.completed += 1;
                    status.failures = 0;
                    status.last_error = None;
                    status.last_success = Some(snapshot.refreshed_at());
                });
                info!(
                    dataset = %E::DATASET,
                    entries = snapshot.len(),
                    aliases = snapshot.by_alias().len(),
                    generation = snapshot.generation(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Published directory snapshot"
                );
            }
            Err(err) => {
                metrics::record_refresh(E::DATASET, RefreshOutcome::Failure, elapsed);

                let mut ready = false;
                let mut failures = 0;
                self.status.send_modify(|status| {
                    status.state = if status.ready {
                        RefreshState::ReadyStale
                    } else {
                        RefreshState::Idle
                    };
                    status.completed += 1;
                    status.failures = status.failures.saturating_add(1);
                    status.last_error = Some(err.clone());
                    ready = status.ready;
                    failures = status.failures;
                });

                if ready {
                    warn!(
                        dataset = %E::DATASET,
                        error = %err,
                        failures,
                        generation = self.store.generation(),
                        "Refresh failed, serving previous snapshot"
                    );
                } else {
                    error!(
                        dataset = %E::DATASET,
                        error = %err,
                        failures,
                        "Initial refresh failed, directory not ready"
                    );
                }
            }
        }
    }
}
