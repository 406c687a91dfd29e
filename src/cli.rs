use std::{fs, net::SocketAddr, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use directory_cache::DirectoryConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// User token; preferred over the bot token when both are set
    #[arg(long, env = "SLACK_MCP_XOXP_TOKEN", hide_env_values = true, global = true)]
    pub xoxp_token: Option<String>,

    /// Bot token
    #[arg(long, env = "SLACK_MCP_XOXB_TOKEN", hide_env_values = true, global = true)]
    pub xoxb_token: Option<String>,

    /// Slack Web API base URL (overrides config file)
    #[arg(long, env = "SLACK_MCP_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep the directory warm until interrupted
    Serve(ServeArgs),
    /// Load the directory once and print the id of each token
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Expose Prometheus metrics on this address
    #[arg(long, env = "SLACK_DIRECTORY_PROMETHEUS_ADDR")]
    pub prometheus_addr: Option<SocketAddr>,

    /// Exit with an error when the initial load fails
    #[arg(long)]
    pub require_ready: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Which dataset to resolve against
    #[arg(long, value_enum, default_value_t = ResolveKind::Auto)]
    pub kind: ResolveKind,

    /// `@handle`, `#channel`, email or raw id
    #[arg(required = true)]
    pub tokens: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveKind {
    /// Users first, then conversations
    Auto,
    User,
    Channel,
}

impl Cli {
    /// Token used for every Slack call.
    pub fn token(&self) -> Result<String> {
        let non_empty = |token: &Option<String>| {
            token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };
        match non_empty(&self.xoxp_token).or_else(|| non_empty(&self.xoxb_token)) {
            Some(token) => Ok(token),
            None => bail!(
                "Set SLACK_MCP_XOXP_TOKEN or SLACK_MCP_XOXB_TOKEN (or pass --xoxp-token / --xoxb-token)"
            ),
        }
    }

    /// Config file (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<DirectoryConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_yaml::from_str::<DirectoryConfig>(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => DirectoryConfig::default(),
        };

        if let Some(api_url) = &self.api_url {
            config.slack.api_url = api_url.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
