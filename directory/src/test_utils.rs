//! Shared helpers for crate-internal tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{
    error::{DirectoryError, DirectoryResult},
    fetcher::{Page, PageSource},
    types::{Channel, ChannelKind, User},
};

/// Single-page source that replays scripted outcomes, one per fetch.
///
/// With a gate installed every fetch parks until the test adds a permit,
/// which keeps an attempt "in flight" for as long as the test needs.
pub(crate) struct ScriptedSource<E> {
    outcomes: Mutex<VecDeque<DirectoryResult<Vec<E>>>>,
    fallback: Mutex<DirectoryResult<Vec<E>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl<E: Clone + Send + Sync> ScriptedSource<E> {
    pub fn new(outcomes: Vec<DirectoryResult<Vec<E>>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback: Mutex::new(Err(DirectoryError::Upstream("script exhausted".to_string()))),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn always(entries: Vec<E>) -> Self {
        let source = Self::new(Vec::new());
        *source.fallback.lock() = Ok(entries);
        source
    }

    #[must_use]
    pub fn then_always(self, outcome: DirectoryResult<Vec<E>>) -> Self {
        *self.fallback.lock() = outcome;
        self
    }

    #[must_use]
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Clone + Send + Sync> PageSource<E> for ScriptedSource<E> {
    async fn fetch_page(&self, _cursor: Option<&str>) -> DirectoryResult<Page<E>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| DirectoryError::Cancelled)?
                .forget();
        }
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());
        outcome.map(Page::last)
    }
}

pub(crate) fn users(names: &[(&str, &str)]) -> Vec<User> {
    names
        .iter()
        .map(|(id, name)| User::new(*id, *name).with_email(format!("{name}@example.com")))
        .collect()
}

pub(crate) fn channels(names: &[(&str, &str)]) -> Vec<Channel> {
    names
        .iter()
        .map(|(id, name)| Channel::new(*id, *name, ChannelKind::PublicChannel))
        .collect()
}
