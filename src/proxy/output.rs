//! Output store for the working-proxy artifact
//!
//! Working proxies are appended incrementally as tests complete so a
//! crashed run still leaves a usable partial file. A finalize pass then
//! re-validates, dedupes and sorts the artifact in place. One lock guards
//! both the file and the run-local dedupe set; it is held only across the
//! brief file operations, never across network I/O.

use crate::proxy::parser::ProxyKeyCodec;
use crate::Result;
use anyhow::Context;
use std::collections::{BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct OutputStore {
    path: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl OutputStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            written: Mutex::new(HashSet::new()),
        }
    }

    /// Truncate the artifact and reset the run-local dedupe set
    pub async fn clear(&self) -> Result<()> {
        let mut written = self.written.lock().await;
        std::fs::write(&self.path, "")
            .with_context(|| format!("clearing output file {}", self.path.display()))?;
        written.clear();
        info!("cleared output file {} for new cycle", self.path.display());
        Ok(())
    }

    /// Append a key to the artifact unless it was already written this run
    ///
    /// Returns whether the key was appended. At most one write happens per
    /// key per run, regardless of completion order.
    pub async fn append_if_new(&self, key: &str) -> Result<bool> {
        let mut written = self.written.lock().await;
        if written.contains(key) {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening output file {}", self.path.display()))?;
        writeln!(file, "{}", key)
            .with_context(|| format!("appending to output file {}", self.path.display()))?;

        written.insert(key.to_string());
        debug!("appended working proxy {}", key);
        Ok(true)
    }

    /// Re-validate, dedupe, sort and rewrite the artifact in place
    ///
    /// Lines that do not parse back through the codec are dropped, which
    /// repairs any partial writes. A missing artifact counts as empty.
    /// Returns the number of entries in the finalized artifact.
    pub async fn finalize(&self) -> Result<usize> {
        let _written = self.written.lock().await;

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no output file to finalize, treating as empty");
                return Ok(0);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("reading output file {}", self.path.display())
                })
            }
        };

        let keys: BTreeSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| ProxyKeyCodec::parse_line(line).is_some())
            .map(str::to_string)
            .collect();

        let mut body = keys.iter().cloned().collect::<Vec<_>>().join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&self.path, body)
            .with_context(|| format!("rewriting output file {}", self.path.display()))?;

        info!("finalized {} working proxies in {}", keys.len(), self.path.display());
        Ok(keys.len())
    }
}
