//! Directory cache error types.
//!
//! Errors are `Clone` because a refresh failure is recorded once in the
//! dataset's status and then handed out to every reader that asks why the
//! dataset is not ready.

use std::time::Duration;

use thiserror::Error;

use crate::types::Dataset;

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// First refresh has not completed yet and nothing has failed so far.
    #[error("{0} directory is not ready yet")]
    NotReady(Dataset),

    /// First refresh failed and no snapshot was ever published.
    #[error("{dataset} directory is not ready: {source}")]
    InitialRefreshFailed {
        dataset: Dataset,
        #[source]
        source: Box<DirectoryError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DirectoryError {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_)
                | Self::RateLimited { .. }
                | Self::Transport(_)
                | Self::Cancelled
                | Self::Timeout(_)
        )
    }

    /// Wait the upstream asked for before the next request, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
