//! Cycle orchestrator
//!
//! One cycle: clear the output artifact, fetch all sources, probe the
//! machine's own IP, test the merged candidate batch, finalize the
//! artifact, and emit a summary. Per-source and per-candidate failures
//! stay local; only an error escaping this orchestrator aborts the cycle.

use crate::config::Config;
use crate::proxy::checker::ProxyValidator;
use crate::proxy::fetcher::SourceFetcher;
use crate::proxy::governor::ConcurrencyGovernor;
use crate::proxy::output::OutputStore;
use crate::proxy::progress::ProgressTracker;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// End-of-cycle report
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub tested: u64,
    pub working: u64,
    pub dead: u64,
    /// Entries in the output artifact after finalize
    pub finalized: usize,
    pub duration: Duration,
}

impl CycleSummary {
    pub fn success_rate(&self) -> Option<f64> {
        (self.tested > 0).then(|| self.working as f64 / self.tested as f64 * 100.0)
    }
}

/// Run one fetch → test → finalize cycle over the given source URLs
pub async fn run_cycle(config: Arc<Config>, sources: &[String]) -> Result<CycleSummary> {
    let cycle_start = Instant::now();
    info!("starting proxy checking cycle");

    let governor = ConcurrencyGovernor::new(&config)?;
    let store = OutputStore::new(config.output_file.clone());
    store.clear().await?;

    let fetcher = SourceFetcher::new(config.clone());
    let candidates = fetcher.fetch_all(&governor, sources).await;
    if candidates.is_empty() {
        warn!("no proxies fetched from sources, ending cycle");
        return Ok(CycleSummary {
            duration: cycle_start.elapsed(),
            ..CycleSummary::default()
        });
    }

    let mut batch: Vec<String> = candidates.into_iter().collect();
    batch.sort();
    info!("total unique proxies to test: {}", batch.len());

    let machine_ip = ProxyValidator::probe_machine_ip(&config, &governor).await;
    let validator = ProxyValidator::new(config.clone(), machine_ip);

    let tracker = ProgressTracker::new(batch.len() as u64, config.progress_interval);
    tracker.report(true);

    validator
        .test_batch(&governor, &tracker, &store, batch)
        .await;
    tracker.report(true);

    let finalized = store.finalize().await?;

    let stats = tracker.snapshot();
    let summary = CycleSummary {
        tested: stats.tested,
        working: stats.working,
        dead: stats.dead,
        finalized,
        duration: cycle_start.elapsed(),
    };

    info!("cycle completed in {:.2}s", summary.duration.as_secs_f64());
    info!(
        "tested: {} | working: {} | dead: {}",
        summary.tested, summary.working, summary.dead
    );
    if let Some(rate) = summary.success_rate() {
        info!("success rate: {:.1}%", rate);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let summary = CycleSummary {
            tested: 200,
            working: 50,
            dead: 150,
            ..CycleSummary::default()
        };
        assert!((summary.success_rate().unwrap() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_unavailable_when_nothing_tested() {
        assert!(CycleSummary::default().success_rate().is_none());
    }

    #[tokio::test]
    async fn test_cycle_with_no_sources_ends_early() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            output_file: dir.path().join("proxies.txt"),
            ..Config::default()
        });

        let summary = run_cycle(config, &[]).await.unwrap();
        assert_eq!(summary.tested, 0);
        assert_eq!(summary.finalized, 0);
        // clear() ran before the early return, so the artifact exists empty
        let content = std::fs::read_to_string(dir.path().join("proxies.txt")).unwrap();
        assert!(content.is_empty());
    }
}
