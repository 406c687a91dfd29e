//! Directory cache configuration.
//!
//! Every section has serde defaults so an empty document is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{DirectoryError, DirectoryResult},
    types::ChannelKind,
};

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api/";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DirectoryConfig {
    /// Outbound request budget shared by refreshes and ad-hoc calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Snapshot refresh schedule and guard rails
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Upstream API settings
    #[serde(default)]
    pub slack: SlackConfig,
}

impl DirectoryConfig {
    pub fn validate(&self) -> DirectoryResult<()> {
        self.refresh.validate()?;
        self.slack.validate()
    }
}

/// Token bucket parameters.
///
/// `requests_per_minute = 0` disables limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn unlimited() -> Self {
        Self {
            requests_per_minute: 0,
            burst: 1,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    20 // Slack Tier 2 (users.list, conversations.list)
}

fn default_burst() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// Seconds between scheduled refreshes of each dataset
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for one refresh attempt, pagination included
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Pagination guard against upstream cursor loops
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// First retry delay after a failed attempt, doubled per consecutive failure
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Longest delay between retries; never longer than `interval_secs`
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// How long startup waits for both datasets
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn validate(&self) -> DirectoryResult<()> {
        if self.interval_secs == 0 {
            return Err(DirectoryError::Config(
                "refresh.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(DirectoryError::Config(
                "refresh.attempt_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(DirectoryError::Config(
                "refresh.max_pages must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_pages: default_max_pages(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_attempt_timeout_secs() -> u64 {
    600
}

fn default_max_pages() -> usize {
    1000
}

fn default_retry_base_delay_ms() -> u64 {
    5000
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_ready_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SlackConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// `limit` sent with every listing request (1..=1000)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Conversation types listed into the channels dataset
    #[serde(default = "default_channel_types")]
    pub channel_types: Vec<ChannelKind>,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SlackConfig {
    pub fn validate(&self) -> DirectoryResult<()> {
        if !(1..=1000).contains(&self.page_size) {
            return Err(DirectoryError::Config(format!(
                "slack.page_size must be between 1 and 1000, got {}",
                self.page_size
            )));
        }
        if self.channel_types.is_empty() {
            return Err(DirectoryError::Config(
                "slack.channel_types must not be empty".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(DirectoryError::Config(
                "slack.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(DirectoryError::Config(format!(
                "slack.api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        Ok(())
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_size: default_page_size(),
            channel_types: default_channel_types(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_SLACK_API_URL.to_string()
}

fn default_page_size() -> u32 {
    200
}

fn default_channel_types() -> Vec<ChannelKind> {
    ChannelKind::ALL.to_vec()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: DirectoryConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, DirectoryConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.requests_per_minute, 20);
        assert_eq!(config.slack.channel_types.len(), 4);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
rate_limit:
  requests_per_minute: 50
refresh:
  interval_secs: 120
slack:
  channel_types: [public_channel, im]
"#;
        let config: DirectoryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 50);
        assert_eq!(config.rate_limit.burst, 3);
        assert_eq!(config.refresh.interval(), Duration::from_secs(120));
        assert_eq!(config.refresh.max_pages, 1000);
        assert_eq!(
            config.slack.channel_types,
            vec![ChannelKind::PublicChannel, ChannelKind::Im]
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DirectoryConfig::default();
        config.slack.page_size = 0;
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));

        let mut config = DirectoryConfig::default();
        config.refresh.interval_secs = 0;
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));

        let mut config = DirectoryConfig::default();
        config.slack.api_url = "slack.com/api".to_string();
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));

        let mut config = DirectoryConfig::default();
        config.slack.request_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(DirectoryError::Config(_))));
    }
}
