//! Run configuration
//!
//! One immutable [`Config`] value is built by the CLI layer and handed to
//! every component constructor; nothing reads configuration ambiently.

use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for each proxy test request in seconds
const DEFAULT_TEST_TIMEOUT_SECS: u64 = 15;

/// Default timeout for fetching a single source list in seconds
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;

/// Default number of concurrent source fetches
const DEFAULT_FETCH_CONCURRENCY: usize = 50;

/// Default number of concurrent proxy tests
const DEFAULT_TEST_CONCURRENCY: usize = 1500;

/// Default cap on connections to a single remote host
const DEFAULT_PER_HOST_LIMIT: usize = 50;

/// Default interval between progress reports in seconds
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 5;

/// Default user agent sent on outbound requests
const DEFAULT_USER_AGENT: &str = "ProxyWarden/0.1";

/// Remote endpoints used to probe candidates
#[derive(Debug, Clone)]
pub struct TestUrls {
    /// IP-echo endpoint returning a JSON body with an `origin` field
    pub http_echo: String,
    /// HTTPS-reachable mirror of the echo endpoint
    pub https_echo: String,
    /// Lightweight endpoint answering 204 No Content when reachable
    pub connectivity: String,
}

impl Default for TestUrls {
    fn default() -> Self {
        Self {
            http_echo: "http://httpbin.org/ip".to_string(),
            https_echo: "https://httpbin.org/ip".to_string(),
            connectivity: "https://www.google.com/generate_204".to_string(),
        }
    }
}

/// Immutable configuration for one checking cycle
#[derive(Debug, Clone)]
pub struct Config {
    /// File containing source URLs, one per line
    pub sources_file: PathBuf,
    /// File receiving confirmed-working proxies
    pub output_file: PathBuf,
    /// Endpoints used by the test stages
    pub test_urls: TestUrls,
    /// Timeout applied to each proxy test request
    pub test_timeout: Duration,
    /// Timeout applied to each source list fetch
    pub fetch_timeout: Duration,
    /// Number of source fetches allowed in flight at once
    pub fetch_concurrency: usize,
    /// Number of proxy tests allowed in flight at once
    pub test_concurrency: usize,
    /// Cap on simultaneous connections to any single host
    pub per_host_limit: usize,
    /// Minimum interval between progress reports
    pub progress_interval: Duration,
    /// User agent sent on all outbound requests
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources_file: PathBuf::from("list.txt"),
            output_file: PathBuf::from("proxies.txt"),
            test_urls: TestUrls::default(),
            test_timeout: Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            test_concurrency: DEFAULT_TEST_CONCURRENCY,
            per_host_limit: DEFAULT_PER_HOST_LIMIT,
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}
