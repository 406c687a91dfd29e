//! Cursor-paginated listing of a whole dataset.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{DirectoryError, DirectoryResult},
    limiter::RateLimiter,
    metrics,
    types::DirectoryEntry,
};

/// One page of an upstream listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<E> {
    pub entries: Vec<E>,
    /// Continuation cursor; `None` or empty when this was the last page.
    pub next_cursor: Option<String>,
}

impl<E> Page<E> {
    pub fn last(entries: Vec<E>) -> Self {
        Self {
            entries,
            next_cursor: None,
        }
    }

    pub fn with_cursor(entries: Vec<E>, cursor: impl Into<String>) -> Self {
        Self {
            entries,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// An upstream listing endpoint.
#[async_trait]
pub trait PageSource<E>: Send + Sync {
    /// Fetch the page at `cursor`; `None` asks for the first page.
    async fn fetch_page(&self, cursor: Option<&str>) -> DirectoryResult<Page<E>>;
}

pub struct PagedFetcher<E> {
    source: Arc<dyn PageSource<E>>,
    limiter: Arc<RateLimiter>,
    max_pages: usize,
}

impl<E: DirectoryEntry> PagedFetcher<E> {
    pub fn new(
        source: Arc<dyn PageSource<E>>,
        limiter: Arc<RateLimiter>,
        max_pages: usize,
    ) -> Self {
        Self {
            source,
            limiter,
            max_pages: max_pages.max(1),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Follow the cursor until the upstream reports no further pages.
    ///
    /// Each page costs one rate limiter permit. Any error discards what was
    /// accumulated so far; a partial listing never leaves this function.
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> DirectoryResult<Vec<E>> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            self.limiter.acquire(cancel).await?;

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DirectoryError::Cancelled),
                page = self.source.fetch_page(cursor.as_deref()) => page?,
            };
            pages += 1;
            metrics::record_page(E::DATASET);
            debug!(
                dataset = %E::DATASET,
                page = pages,
                entries = page.entries.len(),
                "Fetched page"
            );
            entries.extend(page.entries);

            let next = match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => next,
                None => break,
            };
            if cursor.as_deref() == Some(next.as_str()) {
                return Err(DirectoryError::Pagination(format!(
                    "{} listing returned the same cursor twice",
                    E::DATASET
                )));
            }
            if pages >= self.max_pages {
                return Err(DirectoryError::Pagination(format!(
                    "{} listing exceeded {} pages",
                    E::DATASET,
                    self.max_pages
                )));
            }
            cursor = Some(next);
        }

        Ok(entries)
    }
}
