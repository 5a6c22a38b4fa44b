use anyhow::{Context, Result};
use clap::Parser;
use proxy_warden::{config::TestUrls, run_cycle, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Fetches proxy lists, tests candidates concurrently, and maintains a
/// sorted file of working proxies
#[derive(Parser)]
#[command(name = "proxy-warden")]
#[command(about = "A bounded-concurrency proxy list fetcher and checker")]
struct Cli {
    /// File containing source URLs, one per line
    #[arg(short, long, default_value = "list.txt")]
    sources: PathBuf,

    /// Output file for working proxies
    #[arg(short, long, default_value = "proxies.txt")]
    output: PathBuf,

    /// Timeout in seconds for each proxy test request
    #[arg(long, default_value = "15")]
    timeout: u64,

    /// Timeout in seconds for each source list fetch
    #[arg(long, default_value = "20")]
    fetch_timeout: u64,

    /// Number of concurrent source fetches
    #[arg(long, default_value = "50")]
    fetch_concurrency: usize,

    /// Number of concurrent proxy tests
    #[arg(short = 'n', long, default_value = "1500")]
    test_concurrency: usize,

    /// Cap on simultaneous connections to a single host
    #[arg(long, default_value = "50")]
    per_host_limit: usize,

    /// Seconds between progress reports
    #[arg(long, default_value = "5")]
    progress_interval: u64,

    /// URL of the HTTP IP-echo endpoint
    #[arg(long, default_value = "http://httpbin.org/ip")]
    http_echo_url: String,

    /// URL of the HTTPS IP-echo endpoint
    #[arg(long, default_value = "https://httpbin.org/ip")]
    https_echo_url: String,

    /// URL of the no-content connectivity endpoint
    #[arg(long, default_value = "https://www.google.com/generate_204")]
    connectivity_url: String,

    /// User agent sent on outbound requests
    #[arg(long, default_value = "ProxyWarden/0.1")]
    user_agent: String,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            sources_file: self.sources,
            output_file: self.output,
            test_urls: TestUrls {
                http_echo: self.http_echo_url,
                https_echo: self.https_echo_url,
                connectivity: self.connectivity_url,
            },
            test_timeout: Duration::from_secs(self.timeout),
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            fetch_concurrency: self.fetch_concurrency,
            test_concurrency: self.test_concurrency,
            per_host_limit: self.per_host_limit,
            progress_interval: Duration::from_secs(self.progress_interval),
            user_agent: self.user_agent,
        }
    }
}

/// Load source URLs, skipping blank lines and `#` comments
fn load_sources(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading proxy sources file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Arc::new(cli.into_config());

    let sources = load_sources(&config.sources_file)?;
    info!(
        "loaded {} proxy sources from {}",
        sources.len(),
        config.sources_file.display()
    );

    let summary = run_cycle(config.clone(), &sources).await?;
    info!(
        "working proxies are in {} ({} entries)",
        config.output_file.display(),
        summary.finalized
    );

    Ok(())
}
