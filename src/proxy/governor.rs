//! Concurrency governor bounding the fetch and test phases
//!
//! Fetch targets are few, large and slow; test targets are many, small and
//! quick to time out. The two phases get independently sized semaphores so
//! neither starves the other, and share one HTTP client for direct traffic
//! (source fetches, the own-IP probe) with a per-host cap on pooled idle
//! connections and TTL-bounded DNS caching. In-flight request counts are
//! bounded by the semaphores, not the client.

use crate::config::Config;
use crate::Result;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct ConcurrencyGovernor {
    fetch_permits: Arc<Semaphore>,
    test_permits: Arc<Semaphore>,
    client: Client,
}

impl ConcurrencyGovernor {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.fetch_timeout)
            .pool_max_idle_per_host(config.per_host_limit)
            .trust_dns(true)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            fetch_permits: Arc::new(Semaphore::new(config.fetch_concurrency)),
            test_permits: Arc::new(Semaphore::new(config.test_concurrency)),
            client,
        })
    }

    /// Shared client for direct (non-proxied) requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Acquire a slot in the source-fetch pool
    ///
    /// The permit releases on drop, on every exit path. Acquisition only
    /// fails if the semaphore is closed, which never happens here since the
    /// governor owns it for the whole cycle.
    pub async fn fetch_permit(&self) -> SemaphorePermit<'_> {
        self.fetch_permits
            .acquire()
            .await
            .expect("fetch semaphore closed unexpectedly")
    }

    /// Acquire a slot in the proxy-test pool
    pub async fn test_permit(&self) -> SemaphorePermit<'_> {
        self.test_permits
            .acquire()
            .await
            .expect("test semaphore closed unexpectedly")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_independent() {
        let config = Config {
            fetch_concurrency: 1,
            test_concurrency: 2,
            ..Config::default()
        };
        let governor = ConcurrencyGovernor::new(&config).unwrap();

        // Exhausting the fetch pool must not block the test pool.
        let _fetch = governor.fetch_permit().await;
        let _test_a = governor.test_permit().await;
        let _test_b = governor.test_permit().await;
        assert_eq!(governor.fetch_permits.available_permits(), 0);
        assert_eq!(governor.test_permits.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let config = Config {
            fetch_concurrency: 1,
            ..Config::default()
        };
        let governor = ConcurrencyGovernor::new(&config).unwrap();
        {
            let _permit = governor.fetch_permit().await;
            assert_eq!(governor.fetch_permits.available_permits(), 0);
        }
        assert_eq!(governor.fetch_permits.available_permits(), 1);
    }
}
