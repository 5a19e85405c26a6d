use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use liveweb_client::RemoteLiveWebCache;
use liveweb_core::error::LiveWebError;
use liveweb_core::models::{FetchOutcome, FetchRequest, OutcomeKind};
use liveweb_core::traits::LiveWebCache;
use liveweb_core::{PoolConfig, ProxyAddr};

#[derive(Parser)]
#[command(name = "liveweb", version, about = "Fetch live-web documents as archive resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one or more URLs through the live-web service
    Fetch {
        /// Target URL (repeat for concurrent fetches)
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        pool: PoolArgs,

        /// Maximum acceptable cache age in ms (accepted, not used by the remote fetcher)
        #[arg(long, default_value_t = 0)]
        max_cache_ms: u64,

        /// Accept results older than --max-cache-ms (accepted, not used by the remote fetcher)
        #[arg(long, default_value_t = false)]
        use_older: bool,

        /// Write the body of the fetched document to this file (single URL only)
        #[arg(long)]
        body: Option<PathBuf>,
    },

    /// Print the effective connection pool settings
    Config {
        #[command(flatten)]
        pool: PoolArgs,
    },
}

/// Pool overrides. Unset flags fall back to `LIVEWEB_*` variables, then defaults.
#[derive(Args, Debug, Default)]
struct PoolArgs {
    /// Forward proxy as host:port (e.g. "localhost:3128")
    #[arg(long)]
    proxy: Option<String>,

    /// Maximum connections across all hosts
    #[arg(long)]
    max_total_connections: Option<usize>,

    /// Maximum connections per host
    #[arg(long)]
    max_host_connections: Option<usize>,

    /// Connect timeout in milliseconds (0 = no limit)
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Socket read timeout in milliseconds (0 = no limit)
    #[arg(long)]
    socket_timeout_ms: Option<u64>,
}

impl PoolArgs {
    fn apply(&self, mut config: PoolConfig) -> Result<PoolConfig, LiveWebError> {
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.parse::<ProxyAddr>()?);
        }
        if let Some(max) = self.max_total_connections {
            config.max_total_connections = max;
        }
        if let Some(max) = self.max_host_connections {
            config.max_host_connections = max;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.socket_timeout_ms {
            config.socket_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

/// One JSON line of `fetch` output.
#[derive(Debug, Serialize)]
struct FetchReport<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<OutcomeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capture_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> FetchReport<'a> {
    fn new(url: &'a str, result: &Result<FetchOutcome, LiveWebError>) -> Self {
        let mut report = Self {
            url,
            outcome: None,
            reason: None,
            status: None,
            headers: None,
            body_length: None,
            capture_date: None,
            error: None,
        };
        match result {
            Ok(outcome) => {
                report.outcome = Some(outcome.kind());
                report.reason = outcome.reason().map(str::to_string);
                if let FetchOutcome::Resource(resource) = outcome {
                    report.status = Some(resource.status_code);
                    report.headers = Some(
                        resource
                            .headers
                            .iter()
                            .map(|(name, value)| (name.to_string(), value.to_string()))
                            .collect(),
                    );
                    report.body_length = Some(resource.body.len());
                    report.capture_date = resource
                        .capture_date
                        .map(|date| date.format("%Y-%m-%dT%H:%M:%S").to_string());
                }
            }
            Err(e) => report.error = Some(e.to_string()),
        }
        report
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("liveweb=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            urls,
            pool,
            max_cache_ms,
            use_older,
            body,
        } => {
            let config = pool.apply(PoolConfig::from_env()?)?;
            cmd_fetch(&urls, config, max_cache_ms, use_older, body.as_deref()).await?;
        }
        Commands::Config { pool } => {
            let config = pool.apply(PoolConfig::from_env()?)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "proxy": config.proxy.as_ref().map(ToString::to_string),
                    "max_total_connections": config.max_total_connections,
                    "max_host_connections": config.max_host_connections,
                    "connect_timeout_ms": config.connect_timeout_ms,
                    "socket_timeout_ms": config.socket_timeout_ms,
                }))?
            );
        }
    }

    Ok(())
}

async fn cmd_fetch(
    urls: &[String],
    config: PoolConfig,
    max_cache_ms: u64,
    use_older: bool,
    body_path: Option<&Path>,
) -> Result<()> {
    if body_path.is_some() && urls.len() != 1 {
        anyhow::bail!("--body can only be used with a single --url");
    }

    let cache = RemoteLiveWebCache::new(config).context("Failed to create live web cache")?;

    tracing::info!(count = urls.len(), "Fetching live resources");

    let requests: Vec<FetchRequest> = urls
        .iter()
        .map(|url| {
            FetchRequest::new(url.as_str())
                .with_max_cache_ms(max_cache_ms)
                .with_use_older(use_older)
        })
        .collect();
    let results = futures::future::join_all(
        requests
            .iter()
            .map(|request| cache.get_cached_resource(request)),
    )
    .await;

    let mut failures = 0;
    for (url, result) in urls.iter().zip(&results) {
        println!("{}", serde_json::to_string(&FetchReport::new(url, result))?);
        if result.is_err() {
            failures += 1;
        }
    }

    if let (Some(path), Some(Ok(FetchOutcome::Resource(resource)))) = (body_path, results.first())
    {
        std::fs::write(path, &resource.body)
            .with_context(|| format!("Failed to write body to {}", path.display()))?;
        tracing::info!(
            bytes = resource.body.len(),
            path = %path.display(),
            "Wrote document body"
        );
    }

    cache.shutdown();

    if failures > 0 {
        anyhow::bail!("{failures} fetch(es) failed with unexpected errors");
    }
    Ok(())
}
