//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared proxy scheme
///
/// Advisory only: testing always drives the candidate as an HTTP forward
/// proxy regardless of the declared scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProxyScheme {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    /// Parse a scheme token, returning `None` for unrecognized schemes
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks4" => Some(ProxyScheme::Socks4),
            "socks5" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Https => write!(f, "https"),
            ProxyScheme::Socks4 => write!(f, "socks4"),
            ProxyScheme::Socks5 => write!(f, "socks5"),
        }
    }
}

/// An unverified proxy endpoint pulled from a source list
///
/// Identity is the `host:port` key alone; two candidates with equal keys and
/// different declared schemes are the same proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub scheme: ProxyScheme,
}

impl Candidate {
    pub fn new(host: String, port: u16, scheme: ProxyScheme) -> Self {
        Self { host, port, scheme }
    }

    /// Canonical `host:port` key
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How much a proxy reveals about the originating machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    #[default]
    Unknown,
    /// The proxy forwards the caller's real IP
    Transparent,
    /// The reported origin points back at the proxy itself
    Anonymous,
    /// The reported origin matches neither caller nor proxy
    Elite,
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Unknown => write!(f, "unknown"),
            Anonymity::Transparent => write!(f, "transparent"),
            Anonymity::Anonymous => write!(f, "anonymous"),
            Anonymity::Elite => write!(f, "elite"),
        }
    }
}

/// Result of testing one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Canonical `host:port` key of the tested candidate
    pub proxy: String,
    pub working: bool,
    pub http_ok: bool,
    pub https_ok: bool,
    pub connectivity_ok: bool,
    pub anonymity: Anonymity,
    /// Wall-clock latency of the HTTP echo stage in milliseconds
    pub latency_ms: Option<f64>,
    /// Categorized errors in the order the stages recorded them
    pub errors: Vec<String>,
}

impl TestOutcome {
    /// Empty outcome for a candidate before any stage has run
    pub fn pending(proxy: String) -> Self {
        Self {
            proxy,
            working: false,
            http_ok: false,
            https_ok: false,
            connectivity_ok: false,
            anonymity: Anonymity::Unknown,
            latency_ms: None,
            errors: Vec::new(),
        }
    }

    /// Outcome for a candidate whose test task failed outright
    pub fn failed(proxy: String, error: String) -> Self {
        let mut outcome = Self::pending(proxy);
        outcome.errors.push(error);
        outcome
    }

    /// A candidate works iff the HTTP echo and connectivity stages both
    /// passed. The HTTPS result is recorded but never gates this.
    pub fn settle(&mut self) {
        self.working = self.http_ok && self.connectivity_ok;
    }
}
