//! `slack-directory`: keeps a Slack workspace directory cached and resolvable.
//!
//! - `serve`: load users and conversations, then keep them fresh until Ctrl-C
//! - `resolve`: load once and print `token<TAB>id` for each argument

mod cli;
mod logging;

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use backoff::ExponentialBackoffBuilder;
use clap::Parser;
use directory_cache::{
    AuthInfo, CacheStats, ConversationsSource, DatasetStats, DirectoryCache, DirectoryConfig,
    DirectoryError, RateLimiter, SlackClient, UsersSource,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command, ResolveArgs, ResolveKind, ServeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json)?;

    let config = cli.load_config()?;
    let token = cli.token()?;

    match cli.command {
        Command::Serve(args) => serve(config, &token, args).await,
        Command::Resolve(args) => resolve(config, &token, args).await,
    }
}

/// Verify the token and wire the Slack sources into a cache.
///
/// The startup `auth.test` call and every listing page draw from the same
/// limiter.
async fn connect(config: &DirectoryConfig, token: &str) -> Result<DirectoryCache> {
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let client = SlackClient::new(token, &config.slack)
        .context("Failed to create Slack client")?
        .with_limiter(Arc::clone(&limiter));

    let auth = auth_test_with_retry(&client)
        .await
        .context("Slack token verification failed")?;
    info!(
        team = %auth.team,
        user = %auth.user,
        url = %auth.url,
        "Authenticated with Slack"
    );

    let users = Arc::new(UsersSource::new(client.clone(), &config.slack));
    let channels = Arc::new(ConversationsSource::new(client, &config.slack));
    DirectoryCache::with_limiter(config.clone(), limiter, users, channels)
        .context("Failed to create directory cache")
}

/// `auth.test` with exponential backoff on transient failures.
async fn auth_test_with_retry(client: &SlackClient) -> Result<AuthInfo, DirectoryError> {
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(Some(Duration::from_secs(120)))
        .build();
    let cancel = CancellationToken::new();

    backoff::future::retry(backoff, || async {
        match client.auth_test(&cancel).await {
            Ok(info) => Ok(info),
            Err(e) if is_permanent_error(&e) => {
                error!(error = %e, "Slack rejected the token, not retrying");
                Err(backoff::Error::permanent(e))
            }
            Err(DirectoryError::RateLimited {
                retry_after: Some(delay),
            }) => {
                warn!(retry_after_secs = delay.as_secs(), "auth.test rate limited, retrying");
                Err(backoff::Error::retry_after(
                    DirectoryError::RateLimited {
                        retry_after: Some(delay),
                    },
                    delay,
                ))
            }
            Err(e) => {
                warn!(error = %e, "auth.test failed, retrying");
                Err(backoff::Error::transient(e))
            }
        }
    })
    .await
}

/// Slack error codes that no amount of retrying will fix.
const PERMANENT_AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
];

fn is_permanent_error(error: &DirectoryError) -> bool {
    match error {
        DirectoryError::Upstream(msg) => PERMANENT_AUTH_ERRORS
            .iter()
            .any(|code| msg.ends_with(code)),
        other => !other.is_transient(),
    }
}

async fn serve(config: DirectoryConfig, token: &str, args: ServeArgs) -> Result<()> {
    if let Some(addr) = args.prometheus_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("Failed to start Prometheus exporter on {addr}"))?;
        info!(%addr, "Prometheus exporter listening");
    }

    let cache = connect(&config, token).await?;
    cache.start();

    let ready_timeout = config.refresh.ready_timeout();
    match cache.wait_ready(ready_timeout).await {
        Ok(()) => log_stats(&cache.stats()),
        Err(e) if args.require_ready => {
            cache.shutdown().await;
            return Err(e).context("Directory did not become ready");
        }
        Err(e) => warn!(
            error = %e,
            "Directory not ready, serving without it while refreshes retry"
        ),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(config.refresh.interval());
    // The first tick fires immediately; stats were just logged.
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
                }
                break;
            }
            _ = ticker.tick() => log_stats(&cache.stats()),
        }
    }

    info!("Shutting down");
    cache.shutdown().await;
    Ok(())
}

async fn resolve(config: DirectoryConfig, token: &str, args: ResolveArgs) -> Result<()> {
    let cache = connect(&config, token).await?;
    cache.start();
    let ready = cache.wait_ready(config.refresh.ready_timeout()).await;
    if let Err(e) = ready {
        cache.shutdown().await;
        return Err(e).context("Directory did not become ready");
    }

    let lines: Vec<String> = args
        .tokens
        .iter()
        .map(|token| format!("{token}\t{}", resolve_token(&cache, args.kind, token)))
        .collect();
    cache.shutdown().await;

    let mut out = std::io::stdout().lock();
    for line in lines {
        writeln!(out, "{line}").context("Failed to write to stdout")?;
    }
    Ok(())
}

fn resolve_token(cache: &DirectoryCache, kind: ResolveKind, token: &str) -> String {
    match kind {
        ResolveKind::User => cache.resolve_user(token),
        ResolveKind::Channel => cache.resolve_channel(token),
        ResolveKind::Auto => {
            let user = cache.resolve_user(token);
            if user != token {
                user
            } else {
                cache.resolve_channel(token)
            }
        }
    }
}

fn log_stats(stats: &CacheStats) {
    for dataset in [&stats.users, &stats.channels] {
        log_dataset(dataset);
    }
}

fn log_dataset(stats: &DatasetStats) {
    info!(
        dataset = %stats.dataset,
        state = %stats.state,
        entries = stats.entries,
        aliases = stats.aliases,
        generation = stats.generation,
        failures = stats.failures,
        last_success = ?stats.last_success,
        "Directory status"
    );
}
