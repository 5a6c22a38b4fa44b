//! Proxy Warden - Proxy List Fetcher and Checker
//!
//! Fetches candidate proxies from remote source lists, tests them
//! concurrently for liveness and anonymity, and maintains a sorted file
//! of confirmed-working proxies.

pub mod config;
pub mod proxy;

pub use config::Config;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
