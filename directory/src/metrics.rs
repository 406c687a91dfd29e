//! Metric names and recording helpers for the directory cache.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::types::Dataset;

pub const REFRESH_TOTAL: &str = "directory_refresh_total";
pub const REFRESH_DURATION_SECONDS: &str = "directory_refresh_duration_seconds";
pub const SNAPSHOT_ENTRIES: &str = "directory_snapshot_entries";
pub const SNAPSHOT_GENERATION: &str = "directory_snapshot_generation";
pub const PAGES_FETCHED_TOTAL: &str = "directory_pages_fetched_total";
pub const RATE_LIMIT_WAIT_SECONDS: &str = "directory_rate_limit_wait_seconds";

/// Outcome label of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success,
    Failure,
}

impl RefreshOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Success => "success",
            RefreshOutcome::Failure => "failure",
        }
    }
}

pub fn record_refresh(dataset: Dataset, outcome: RefreshOutcome, duration: Duration) {
    counter!(REFRESH_TOTAL, "dataset" => dataset.as_str(), "outcome" => outcome.as_str())
        .increment(1);
    histogram!(REFRESH_DURATION_SECONDS, "dataset" => dataset.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_snapshot(dataset: Dataset, entries: usize, generation: u64) {
    gauge!(SNAPSHOT_ENTRIES, "dataset" => dataset.as_str()).set(entries as f64);
    gauge!(SNAPSHOT_GENERATION, "dataset" => dataset.as_str()).set(generation as f64);
}

pub fn record_page(dataset: Dataset) {
    counter!(PAGES_FETCHED_TOTAL, "dataset" => dataset.as_str()).increment(1);
}

pub fn record_rate_limit_wait(wait: Duration) {
    histogram!(RATE_LIMIT_WAIT_SECONDS).record(wait.as_secs_f64());
}
