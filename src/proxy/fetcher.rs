//! Source fetcher for retrieving candidate proxies from remote lists
//!
//! Each source is fetched under the governor's fetch pool. Responses are
//! parsed structurally first (JSON lists and wrapped lists), falling back
//! to line-oriented text scanning when the body is not JSON. A failing
//! source is logged and contributes nothing; it never aborts its siblings.

use crate::config::Config;
use crate::proxy::governor::ConcurrencyGovernor;
use crate::proxy::parser::ProxyKeyCodec;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Closed set of structured shapes a source body may take
///
/// Anything that fails to deserialize into one of these falls back to
/// unstructured text scanning.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourcePayload {
    /// Top-level JSON array of strings and/or `{ip, port}` records
    Entries(Vec<SourceEntry>),
    /// Object wrapping the list under the conventional `data` field
    Wrapped { data: Vec<SourceEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Text(String),
    Record { ip: String, port: PortValue },
    /// Anything else in the list is skipped, not a parse failure
    Other(serde_json::Value),
}

/// Ports appear both as JSON numbers and as strings in the wild
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl std::fmt::Display for PortValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortValue::Number(n) => write!(f, "{}", n),
            PortValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Fetcher collecting candidate keys from all configured sources
pub struct SourceFetcher {
    config: Arc<Config>,
}

impl SourceFetcher {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Fetch every source and union the per-source candidate sets
    pub async fn fetch_all(
        &self,
        governor: &ConcurrencyGovernor,
        sources: &[String],
    ) -> HashSet<String> {
        info!("fetching from {} proxy sources", sources.len());

        let sets: Vec<HashSet<String>> = stream::iter(sources)
            .map(|url| async move {
                let _permit = governor.fetch_permit().await;
                self.fetch_source(governor, url).await
            })
            .buffer_unordered(self.config.fetch_concurrency)
            .collect()
            .await;

        let mut all = HashSet::new();
        for set in sets {
            all.extend(set);
        }
        info!("collected {} unique candidates from sources", all.len());
        all
    }

    /// Fetch a single source, returning an empty set on any failure
    async fn fetch_source(&self, governor: &ConcurrencyGovernor, url: &str) -> HashSet<String> {
        debug!("fetching {}", url);
        let response = match governor
            .client()
            .get(url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("timeout fetching {}", url);
                return HashSet::new();
            }
            Err(e) => {
                warn!("error fetching {}: {}", url, e);
                return HashSet::new();
            }
        };

        if response.status() != StatusCode::OK {
            warn!("failed to fetch {}: HTTP {}", url, response.status());
            return HashSet::new();
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("error reading body of {}: {}", url, e);
                return HashSet::new();
            }
        };

        let keys = Self::parse_body(&body);
        if !keys.is_empty() {
            info!("found {} potential proxies from {}", keys.len(), url);
        }
        keys
    }

    /// Extract candidate keys from a source body
    ///
    /// Structured parse first; non-JSON bodies are scanned line by line.
    pub fn parse_body(body: &str) -> HashSet<String> {
        match serde_json::from_str::<SourcePayload>(body) {
            Ok(payload) => Self::keys_from_payload(payload),
            Err(_) => ProxyKeyCodec::extract_keys(body),
        }
    }

    fn keys_from_payload(payload: SourcePayload) -> HashSet<String> {
        let entries = match payload {
            SourcePayload::Entries(entries) => entries,
            SourcePayload::Wrapped { data } => data,
        };

        entries
            .into_iter()
            .filter_map(|entry| match entry {
                SourceEntry::Text(line) => ProxyKeyCodec::parse_line(&line).map(|c| c.key()),
                SourceEntry::Record { ip, port } => Some(format!("{}:{}", ip, port)),
                SourceEntry::Other(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_plain_text() {
        let keys = SourceFetcher::parse_body("1.2.3.4:8080\n#comment\n5.6.7.8:3128\nnot-a-proxy");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("1.2.3.4:8080"));
        assert!(keys.contains("5.6.7.8:3128"));
    }

    #[test]
    fn test_parse_body_json_string_list() {
        let keys = SourceFetcher::parse_body(r#"["1.2.3.4:8080", "socks5://5.6.7.8:1080", "junk"]"#);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("1.2.3.4:8080"));
        assert!(keys.contains("5.6.7.8:1080"));
    }

    #[test]
    fn test_parse_body_json_record_list() {
        let keys = SourceFetcher::parse_body(r#"[{"ip": "9.9.9.9", "port": 8000}]"#);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("9.9.9.9:8000"));
    }

    #[test]
    fn test_parse_body_json_record_string_port() {
        let keys = SourceFetcher::parse_body(r#"[{"ip": "9.9.9.9", "port": "8000"}]"#);
        assert!(keys.contains("9.9.9.9:8000"));
    }

    #[test]
    fn test_parse_body_json_wrapped_list() {
        let body = r#"{"data": [{"ip": "9.9.9.9", "port": 8000}, "1.2.3.4:8080"]}"#;
        let keys = SourceFetcher::parse_body(body);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("9.9.9.9:8000"));
        assert!(keys.contains("1.2.3.4:8080"));
    }

    #[test]
    fn test_parse_body_skips_unrecognized_entries() {
        let body = r#"[{"ip": "9.9.9.9", "port": 8000}, {"host": "x"}, 42, "1.2.3.4:8080"]"#;
        let keys = SourceFetcher::parse_body(body);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("9.9.9.9:8000"));
        assert!(keys.contains("1.2.3.4:8080"));
    }

    #[test]
    fn test_parse_body_malformed_json_falls_back_to_text() {
        // Broken JSON that still carries one plain line worth scanning.
        let keys = SourceFetcher::parse_body("{\"data\": oops}\n1.2.3.4:8080");
        assert!(keys.contains("1.2.3.4:8080"));
    }

    #[test]
    fn test_structured_and_text_sources_merge_to_one_key() {
        let mut all = HashSet::new();
        all.extend(SourceFetcher::parse_body(r#"[{"ip": "9.9.9.9", "port": 8000}]"#));
        all.extend(SourceFetcher::parse_body("9.9.9.9:8000"));
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = "1.2.3.4:8080\n5.6.7.8:3128";
        let b = "5.6.7.8:3128\n9.9.9.9:8000";

        let mut ab = SourceFetcher::parse_body(a);
        ab.extend(SourceFetcher::parse_body(b));

        let mut ba = SourceFetcher::parse_body(b);
        ba.extend(SourceFetcher::parse_body(a));

        let combined = SourceFetcher::parse_body(&format!("{}\n{}", a, b));

        assert_eq!(ab, ba);
        assert_eq!(ab, combined);
    }
}
