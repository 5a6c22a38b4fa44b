//! Proxy validator running the three-stage connectivity and anonymity check
//!
//! Every candidate is driven as an HTTP forward proxy regardless of its
//! declared scheme. Stage 1 (HTTP echo) gates the rest: on failure the
//! remaining stages are skipped and the candidate is dead. Stage 2 (HTTPS
//! echo) is recorded but never affects the verdict. Stage 3 (no-content
//! connectivity) completes the working predicate.

use crate::config::Config;
use crate::proxy::governor::ConcurrencyGovernor;
use crate::proxy::models::{Anonymity, TestOutcome};
use crate::proxy::output::OutputStore;
use crate::proxy::progress::ProgressTracker;
use crate::Result;
use futures::stream::{self, StreamExt};
use reqwest::{redirect, Client, Proxy as ReqwestProxy, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bound on the one-time own-IP probe in seconds
const MACHINE_IP_PROBE_TIMEOUT_SECS: u64 = 10;

/// Echo body returned by the IP-echo endpoints
#[derive(Debug, Deserialize)]
struct EchoBody {
    origin: String,
}

impl EchoBody {
    /// The caller's apparent IP; comma-separated when chained through
    /// multiple hops, in which case the first component is the one.
    fn reported_ip(&self) -> String {
        self.origin
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Validator testing candidates for liveness and anonymity
pub struct ProxyValidator {
    config: Arc<Config>,
    machine_ip: Option<String>,
}

impl ProxyValidator {
    pub fn new(config: Arc<Config>, machine_ip: Option<String>) -> Self {
        Self { config, machine_ip }
    }

    /// Learn this machine's public IP from the echo endpoint, best effort
    ///
    /// Failure degrades anonymity classification to `unknown` for the
    /// whole cycle; it never aborts the run.
    pub async fn probe_machine_ip(config: &Config, governor: &ConcurrencyGovernor) -> Option<String> {
        let probe = governor
            .client()
            .get(&config.test_urls.http_echo)
            .timeout(Duration::from_secs(MACHINE_IP_PROBE_TIMEOUT_SECS))
            .send();
        match probe.await {
            Ok(response) if response.status() == StatusCode::OK => {
                match response.json::<EchoBody>().await {
                    Ok(body) => {
                        let ip = body.reported_ip();
                        info!("machine IP detected: {}", ip);
                        Some(ip)
                    }
                    Err(e) => {
                        warn!("could not detect machine IP: {}", e);
                        None
                    }
                }
            }
            Ok(response) => {
                warn!("could not detect machine IP (HTTP {})", response.status());
                None
            }
            Err(e) => {
                warn!("could not detect machine IP: {}", e);
                None
            }
        }
    }

    /// Run the three stages against one candidate key
    pub async fn test(&self, key: &str) -> TestOutcome {
        let mut outcome = TestOutcome::pending(key.to_string());

        let client = match self.create_client(key) {
            Ok(client) => client,
            Err(e) => {
                outcome.errors.push(format!("client build error: {}", e));
                return outcome;
            }
        };

        self.http_echo_stage(&client, &mut outcome).await;

        if outcome.http_ok {
            self.https_echo_stage(&client, &mut outcome).await;
            self.connectivity_stage(&client, &mut outcome).await;
        }

        outcome.settle();
        outcome
    }

    /// Stage 1: GET the IP-echo endpoint through the proxy
    ///
    /// Records latency and, on success, classifies anonymity from the
    /// reported origin IP.
    async fn http_echo_stage(&self, client: &Client, outcome: &mut TestOutcome) {
        let start = Instant::now();
        let request = client.get(&self.config.test_urls.http_echo).send();

        let response = match timeout(self.config.test_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                outcome.errors.push(categorize_error("http", &e));
                return;
            }
            Err(_) => {
                outcome.errors.push("http timeout".to_string());
                return;
            }
        };

        outcome.latency_ms = Some(start.elapsed().as_secs_f64() * 1000.0);

        if response.status() != StatusCode::OK {
            outcome.errors.push(format!("http status: {}", response.status()));
            return;
        }

        match response.json::<EchoBody>().await {
            Ok(body) => {
                outcome.http_ok = true;
                outcome.anonymity = classify_anonymity(
                    self.machine_ip.as_deref(),
                    &body.reported_ip(),
                    proxy_host(&outcome.proxy),
                );
            }
            Err(e) => {
                outcome.errors.push(format!("http malformed body: {}", e));
            }
        }
    }

    /// Stage 2: GET the HTTPS echo mirror; recorded, never gating
    async fn https_echo_stage(&self, client: &Client, outcome: &mut TestOutcome) {
        let request = client.get(&self.config.test_urls.https_echo).send();
        match timeout(self.config.test_timeout, request).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                outcome.https_ok = true;
            }
            Ok(Ok(response)) => {
                outcome.errors.push(format!("https status: {}", response.status()));
            }
            Ok(Err(e)) => {
                outcome.errors.push(categorize_error("https", &e));
            }
            Err(_) => {
                outcome.errors.push("https timeout".to_string());
            }
        }
    }

    /// Stage 3: GET the lightweight endpoint expecting 204 No Content
    async fn connectivity_stage(&self, client: &Client, outcome: &mut TestOutcome) {
        let request = client.get(&self.config.test_urls.connectivity).send();
        match timeout(self.config.test_timeout, request).await {
            Ok(Ok(response)) if response.status() == StatusCode::NO_CONTENT => {
                outcome.connectivity_ok = true;
            }
            Ok(Ok(response)) => {
                outcome
                    .errors
                    .push(format!("connectivity status: {}", response.status()));
            }
            Ok(Err(e)) => {
                outcome.errors.push(categorize_error("connectivity", &e));
            }
            Err(_) => {
                outcome.errors.push("connectivity timeout".to_string());
            }
        }
    }

    /// Test a whole batch under the governor's test pool
    ///
    /// Each outcome is reported to the tracker and, when working, appended
    /// to the store before the task returns. No per-candidate failure
    /// escapes its task.
    pub async fn test_batch(
        &self,
        governor: &ConcurrencyGovernor,
        tracker: &ProgressTracker,
        store: &OutputStore,
        candidates: Vec<String>,
    ) -> Vec<TestOutcome> {
        if candidates.is_empty() {
            info!("no proxies in batch to test");
            return Vec::new();
        }

        let width = self.config.test_concurrency;
        stream::iter(candidates)
            .map(|key| async move {
                let _permit = governor.test_permit().await;
                let outcome = self.test(&key).await;

                tracker.update(outcome.working);
                tracker.report(false);

                if outcome.working {
                    if let Err(e) = store.append_if_new(&key).await {
                        warn!("error appending proxy {}: {}", key, e);
                    }
                    info!(
                        "working: {} - latency: {:.0}ms, anonymity: {}, https: {}",
                        key,
                        outcome.latency_ms.unwrap_or(0.0),
                        outcome.anonymity,
                        outcome.https_ok,
                    );
                } else {
                    debug!("dead: {} - errors: {}", key, outcome.errors.join(", "));
                }
                outcome
            })
            .buffer_unordered(width)
            .collect()
            .await
    }

    /// Build the per-candidate client driving the key as a forward proxy
    ///
    /// Always `http://host:port` forwarding, never SOCKS, whatever scheme
    /// the source declared. Redirects stay disabled so echo responses are
    /// judged as served.
    fn create_client(&self, key: &str) -> Result<Client> {
        let proxy = ReqwestProxy::all(&format!("http://{}", key))?;
        let client = Client::builder()
            .proxy(proxy)
            .user_agent(&self.config.user_agent)
            .timeout(self.config.test_timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(client)
    }
}

/// Map a transport error to a categorized, stage-prefixed string
fn categorize_error(stage: &str, e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("{} timeout", stage)
    } else if e.is_connect() {
        format!("{} proxy connect error: {}", stage, e)
    } else {
        format!("{} transport error: {}", stage, e)
    }
}

/// Host part of a canonical `host:port` key
fn proxy_host(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Classify how much the proxy reveals about the caller
///
/// The `anonymous` rule is substring containment: the proxy's host
/// appearing anywhere in the reported origin counts, so chained origins
/// like "1.2.3.4, 5.6.7.8" still attribute to the proxy. Unknown machine
/// IP means no classification at all.
fn classify_anonymity(machine_ip: Option<&str>, reported_ip: &str, proxy_host: &str) -> Anonymity {
    let Some(machine_ip) = machine_ip else {
        return Anonymity::Unknown;
    };
    if reported_ip == machine_ip {
        Anonymity::Transparent
    } else if reported_ip.contains(proxy_host) {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestUrls;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Canned forward proxy: proxied requests arrive as plain absolute-URI
    /// GETs, so a TCP listener with keep-alive request framing is enough to
    /// stand in for a candidate. Returns the candidate key and a counter of
    /// requests served.
    async fn spawn_forward_proxy(respond: fn(&str) -> String) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let key = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_requests(stream, Arc::clone(&counter), respond));
            }
        });
        (key, hits)
    }

    async fn serve_requests(
        mut stream: TcpStream,
        hits: Arc<AtomicUsize>,
        respond: fn(&str) -> String,
    ) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let end = loop {
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            };
            let request_line = String::from_utf8_lossy(&buf[..end])
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            buf.drain(..end);
            hits.fetch_add(1, Ordering::SeqCst);
            if stream
                .write_all(respond(&request_line).as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }
    }

    fn json_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn empty_response(status: &str) -> String {
        format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status)
    }

    fn no_content_response() -> String {
        "HTTP/1.1 204 No Content\r\n\r\n".to_string()
    }

    fn healthy_responder(request_line: &str) -> String {
        if request_line.contains("conn.test") {
            no_content_response()
        } else {
            json_response(r#"{"origin": "9.9.9.9"}"#)
        }
    }

    fn failing_responder(_: &str) -> String {
        empty_response("500 Internal Server Error")
    }

    fn mirror_down_responder(request_line: &str) -> String {
        if request_line.contains("mirror.test") {
            empty_response("502 Bad Gateway")
        } else {
            healthy_responder(request_line)
        }
    }

    fn garbled_responder(_: &str) -> String {
        json_response("not json at all")
    }

    /// Stage targets on distinct fake hosts so the responder can tell them
    /// apart; all plain http so the forward proxy sees absolute-URI GETs.
    fn local_config() -> Arc<Config> {
        Arc::new(Config {
            test_urls: TestUrls {
                http_echo: "http://echo.test/ip".to_string(),
                https_echo: "http://mirror.test/ip".to_string(),
                connectivity: "http://conn.test/status".to_string(),
            },
            test_timeout: Duration::from_secs(5),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn test_all_stages_pass_through_local_proxy() {
        let (key, hits) = spawn_forward_proxy(healthy_responder).await;
        let validator = ProxyValidator::new(local_config(), Some("1.1.1.1".to_string()));

        let outcome = validator.test(&key).await;
        assert!(outcome.http_ok);
        assert!(outcome.https_ok);
        assert!(outcome.connectivity_ok);
        assert!(outcome.working);
        assert!(outcome.latency_ms.is_some());
        assert_eq!(outcome.anonymity, Anonymity::Elite);
        assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stage_one_failure_skips_remaining_stages() {
        let (key, hits) = spawn_forward_proxy(failing_responder).await;
        let validator = ProxyValidator::new(local_config(), None);

        let outcome = validator.test(&key).await;
        assert!(!outcome.http_ok);
        assert!(!outcome.working);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("http status: 500"));
        // Only the echo request reached the proxy.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_https_stage_failure_does_not_gate_working() {
        let (key, hits) = spawn_forward_proxy(mirror_down_responder).await;
        let validator = ProxyValidator::new(local_config(), None);

        let outcome = validator.test(&key).await;
        assert!(outcome.http_ok);
        assert!(!outcome.https_ok);
        assert!(outcome.connectivity_ok);
        assert!(outcome.working);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("https status"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_echo_body_fails_stage_one() {
        let (key, hits) = spawn_forward_proxy(garbled_responder).await;
        let validator = ProxyValidator::new(local_config(), None);

        let outcome = validator.test(&key).await;
        assert!(!outcome.http_ok);
        assert!(!outcome.working);
        assert!(outcome.errors[0].starts_with("http malformed body"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_records_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let key = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        drop(listener);

        let validator = ProxyValidator::new(local_config(), None);
        let outcome = validator.test(&key).await;
        assert!(!outcome.http_ok);
        assert!(!outcome.working);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("http"));
    }

    #[tokio::test]
    async fn test_batch_of_dead_candidates_finalizes_empty_artifact() {
        let (key_a, _) = spawn_forward_proxy(failing_responder).await;
        let (key_b, _) = spawn_forward_proxy(failing_responder).await;
        let config = local_config();

        let governor = ConcurrencyGovernor::new(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path().join("proxies.txt"));
        store.clear().await.unwrap();
        let tracker = ProgressTracker::new(2, Duration::from_secs(5));

        let validator = ProxyValidator::new(config, None);
        let outcomes = validator
            .test_batch(&governor, &tracker, &store, vec![key_a, key_b])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.working));

        let stats = tracker.snapshot();
        assert_eq!((stats.tested, stats.working, stats.dead), (2, 0, 2));

        assert_eq!(store.finalize().await.unwrap(), 0);
        let content = std::fs::read_to_string(dir.path().join("proxies.txt")).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_classify_without_machine_ip() {
        assert_eq!(
            classify_anonymity(None, "9.9.9.9", "9.9.9.9"),
            Anonymity::Unknown
        );
    }

    #[test]
    fn test_classify_transparent() {
        assert_eq!(
            classify_anonymity(Some("1.1.1.1"), "1.1.1.1", "9.9.9.9"),
            Anonymity::Transparent
        );
    }

    #[test]
    fn test_classify_anonymous_by_containment() {
        assert_eq!(
            classify_anonymity(Some("1.1.1.1"), "9.9.9.9", "9.9.9.9"),
            Anonymity::Anonymous
        );
        // Chained origin still attributes to the proxy host.
        assert_eq!(
            classify_anonymity(Some("1.1.1.1"), "7.7.7.7, 9.9.9.9", "9.9.9.9"),
            Anonymity::Anonymous
        );
    }

    #[test]
    fn test_classify_elite() {
        assert_eq!(
            classify_anonymity(Some("1.1.1.1"), "8.8.8.8", "9.9.9.9"),
            Anonymity::Elite
        );
    }

    #[test]
    fn test_echo_body_takes_first_origin_component() {
        let body = EchoBody {
            origin: "1.2.3.4, 5.6.7.8".to_string(),
        };
        assert_eq!(body.reported_ip(), "1.2.3.4");
    }

    #[test]
    fn test_proxy_host_extraction() {
        assert_eq!(proxy_host("1.2.3.4:8080"), "1.2.3.4");
        assert_eq!(proxy_host("no-port"), "no-port");
    }
}
