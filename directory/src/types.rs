//! Directory entry types shared by every dataset.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The two datasets held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Users,
    Channels,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Users => "users",
            Dataset::Channels => "channels",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing identifier normalized for lookup.
///
/// Emails are case-insensitive and stored lowercased; every other alias
/// (`#channel`, `@handle`) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias(String);

impl Alias {
    /// Normalize a raw token into its lookup form.
    pub fn parse(token: &str) -> Self {
        if is_email(token) {
            Self(token.to_lowercase())
        } else {
            Self(token.to_string())
        }
    }

    /// `#name` alias for a conversation.
    pub fn channel(name: &str) -> Self {
        Self(format!("#{name}"))
    }

    /// `@handle` alias for a user or a direct message.
    pub fn handle(name: &str) -> Self {
        Self(format!("@{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_email(token: &str) -> bool {
    match token.find('@') {
        Some(at) if at > 0 => token[at + 1..].contains('.'),
        _ => false,
    }
}

/// Aliases produced by one entry, resolved once at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aliases {
    None,
    Single(Alias),
    Multiple(Vec<Alias>),
}

impl Aliases {
    pub fn from_vec(mut aliases: Vec<Alias>) -> Self {
        match aliases.len() {
            0 => Aliases::None,
            1 => Aliases::Single(aliases.remove(0)),
            _ => Aliases::Multiple(aliases),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Alias> {
        match self {
            Aliases::None => <&[Alias]>::default().iter(),
            Aliases::Single(alias) => std::slice::from_ref(alias).iter(),
            Aliases::Multiple(aliases) => aliases.iter(),
        }
    }

    pub fn contains(&self, alias: &Alias) -> bool {
        self.iter().any(|a| a == alias)
    }
}

/// An upstream record keyed by an opaque id.
pub trait DirectoryEntry: Clone + Send + Sync + 'static {
    const DATASET: Dataset;

    fn id(&self) -> &str;

    fn aliases(&self) -> Aliases;
}

/// A workspace member.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Handle, unique within the workspace.
    pub name: String,
    pub real_name: String,
    pub display_name: String,
    pub email: Option<String>,
    pub is_bot: bool,
    pub deleted: bool,
    pub time_zone: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_real_name(mut self, real_name: impl Into<String>) -> Self {
        self.real_name = real_name.into();
        self
    }
}

impl DirectoryEntry for User {
    const DATASET: Dataset = Dataset::Users;

    fn id(&self) -> &str {
        &self.id
    }

    fn aliases(&self) -> Aliases {
        let mut aliases = Vec::with_capacity(2);
        if !self.name.is_empty() {
            aliases.push(Alias::handle(&self.name));
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.is_empty()) {
            aliases.push(Alias::parse(email));
        }
        Aliases::from_vec(aliases)
    }
}

/// Conversation type as named by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    PublicChannel,
    PrivateChannel,
    Im,
    Mpim,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::PublicChannel,
        ChannelKind::PrivateChannel,
        ChannelKind::Im,
        ChannelKind::Mpim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::PublicChannel => "public_channel",
            ChannelKind::PrivateChannel => "private_channel",
            ChannelKind::Im => "im",
            ChannelKind::Mpim => "mpim",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public_channel" => Ok(ChannelKind::PublicChannel),
            "private_channel" => Ok(ChannelKind::PrivateChannel),
            "im" => Ok(ChannelKind::Im),
            "mpim" => Ok(ChannelKind::Mpim),
            other => Err(format!("unknown channel type '{other}'")),
        }
    }
}

/// A conversation: channel, private group, direct or multi-party message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    /// `#`-less channel name; for a direct message, the peer's handle once known.
    pub name: String,
    pub kind: ChannelKind,
    pub topic: String,
    pub purpose: String,
    pub member_count: u32,
    /// Peer user id of a direct message.
    pub user: Option<String>,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            topic: String::new(),
            purpose: String::new(),
            member_count: 0,
            user: None,
        }
    }

    pub fn direct_message(id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::new(id, String::new(), ChannelKind::Im)
        }
    }
}

impl DirectoryEntry for Channel {
    const DATASET: Dataset = Dataset::Channels;

    fn id(&self) -> &str {
        &self.id
    }

    fn aliases(&self) -> Aliases {
        if self.name.is_empty() {
            return Aliases::None;
        }
        match self.kind {
            ChannelKind::Im => Aliases::Single(Alias::handle(&self.name)),
            _ => Aliases::Single(Alias::channel(&self.name)),
        }
    }
}
