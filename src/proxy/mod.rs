//! Proxy fetching, testing and persistence
//!
//! This module provides functionality for:
//! - Parsing candidate proxies from heterogeneous formats
//! - Fetching candidate lists from remote sources under bounded concurrency
//! - Testing candidates for liveness, HTTPS support and anonymity
//! - Persisting the confirmed-working set incrementally and finalizing it

pub mod checker;
pub mod cycle;
pub mod fetcher;
pub mod governor;
pub mod models;
pub mod output;
pub mod parser;
pub mod progress;

pub use checker::ProxyValidator;
pub use cycle::{run_cycle, CycleSummary};
pub use fetcher::SourceFetcher;
pub use governor::ConcurrencyGovernor;
pub use models::{Anonymity, Candidate, ProxyScheme, TestOutcome};
pub use output::OutputStore;
pub use parser::ProxyKeyCodec;
pub use progress::{CycleStats, ProgressTracker};
