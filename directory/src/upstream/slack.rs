//! Slack Web API transport for `users.list`, `conversations.list` and `auth.test`.
//!
//! Listing calls do not touch the rate limiter themselves: the
//! [`PagedFetcher`](crate::fetcher::PagedFetcher) takes one permit per page.
//! Ad-hoc calls such as [`SlackClient::auth_test`] take their permit here when
//! the client was given a limiter.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER},
    StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::SlackConfig,
    error::{DirectoryError, DirectoryResult},
    fetcher::{Page, PageSource},
    limiter::RateLimiter,
    types::{Channel, ChannelKind, User},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity behind the token, as reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl SlackClient {
    pub fn new(token: &str, config: &SlackConfig) -> DirectoryResult<Self> {
        if token.trim().is_empty() {
            return Err(DirectoryError::Config("Slack token must not be empty".to_string()));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| DirectoryError::Config(format!("Invalid Slack token: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DirectoryError::Config(format!("Failed to build HTTP client: {e}")))?;

        let mut base_url = config.api_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            limiter: None,
        })
    }

    /// Charge ad-hoc calls against `limiter`.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify the token and report whom it belongs to.
    pub async fn auth_test(&self, cancel: &CancellationToken) -> DirectoryResult<AuthInfo> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(cancel).await?;
        }
        self.call("auth.test", &[]).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> DirectoryResult<T> {
        let url = format!("{}{}", self.base_url, method);
        debug!(method, "Calling Slack API");

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(method, ?retry_after, "Slack API rate limited the request");
            return Err(DirectoryError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(DirectoryError::Upstream(format!(
                "{method} returned HTTP {status}"
            )));
        }

        let body = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&body)?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(DirectoryError::Upstream(format!("{method}: {code}")));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Fields every Slack Web API response carries.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

fn next_cursor(metadata: Option<ResponseMetadata>) -> Option<String> {
    metadata.map(|m| m.next_cursor).filter(|c| !c.is_empty())
}

fn page_query(limit: u32, cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.to_string()));
    }
    query
}

// ============================================================================
// users.list
// ============================================================================

#[derive(Debug, Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    tz: Option<String>,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl From<SlackUser> for User {
    fn from(user: SlackUser) -> Self {
        let real_name = user
            .real_name
            .filter(|n| !n.is_empty())
            .or(user.profile.real_name)
            .unwrap_or_default();
        User {
            id: user.id,
            name: user.name,
            real_name,
            display_name: user.profile.display_name.unwrap_or_default(),
            email: user.profile.email.filter(|e| !e.is_empty()),
            is_bot: user.is_bot,
            deleted: user.deleted,
            time_zone: user.tz.filter(|tz| !tz.is_empty()),
        }
    }
}

/// `users.list` as a page source for the users dataset.
pub struct UsersSource {
    client: SlackClient,
    page_size: u32,
}

impl UsersSource {
    pub fn new(client: SlackClient, config: &SlackConfig) -> Self {
        Self {
            client,
            page_size: config.page_size,
        }
    }
}

#[async_trait]
impl PageSource<User> for UsersSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> DirectoryResult<Page<User>> {
        let response: UsersListResponse = self
            .client
            .call("users.list", &page_query(self.page_size, cursor))
            .await?;
        Ok(Page {
            entries: response.members.into_iter().map(User::from).collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }
}

// ============================================================================
// conversations.list
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<SlackConversation>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct SlackConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    topic: Option<TextValue>,
    #[serde(default)]
    purpose: Option<TextValue>,
    #[serde(default)]
    num_members: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TextValue {
    #[serde(default)]
    value: String,
}

impl SlackConversation {
    fn kind(&self) -> ChannelKind {
        if self.is_im {
            ChannelKind::Im
        } else if self.is_mpim {
            ChannelKind::Mpim
        } else if self.is_private {
            ChannelKind::PrivateChannel
        } else {
            ChannelKind::PublicChannel
        }
    }
}

impl From<SlackConversation> for Channel {
    fn from(conversation: SlackConversation) -> Self {
        let kind = conversation.kind();
        // Direct messages are named later, after their peer user.
        let name = match kind {
            ChannelKind::Im => String::new(),
            _ => conversation.name.unwrap_or_default(),
        };
        Channel {
            id: conversation.id,
            name,
            kind,
            topic: conversation.topic.unwrap_or_default().value,
            purpose: conversation.purpose.unwrap_or_default().value,
            member_count: conversation.num_members.unwrap_or_default(),
            user: conversation.user.filter(|u| !u.is_empty()),
        }
    }
}

/// `conversations.list` as a page source for the channels dataset.
pub struct ConversationsSource {
    client: SlackClient,
    page_size: u32,
    types: String,
}

impl ConversationsSource {
    pub fn new(client: SlackClient, config: &SlackConfig) -> Self {
        let types = config
            .channel_types
            .iter()
            .map(ChannelKind::as_str)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            client,
            page_size: config.page_size,
            types,
        }
    }
}

#[async_trait]
impl PageSource<Channel> for ConversationsSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> DirectoryResult<Page<Channel>> {
        let mut query = page_query(self.page_size, cursor);
        query.push(("types", self.types.clone()));
        query.push(("exclude_archived", "true".to_string()));

        let response: ConversationsListResponse =
            self.client.call("conversations.list", &query).await?;
        Ok(Page {
            entries: response.channels.into_iter().map(Channel::from).collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }
}
