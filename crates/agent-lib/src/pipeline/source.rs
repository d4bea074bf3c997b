//! Snapshot input seam for the detection loop
//!
//! The telemetry collector itself lives outside this crate; the loop only
//! needs something that can hand over at most one `UsageSnapshot` per tick.

use super::async_trait;
use crate::models::UsageSnapshot;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

/// Source of usage snapshots, polled once per detection cycle.
#[async_trait]
pub trait SnapshotSource: Send {
    /// The next pending snapshot, or `None` when nothing arrived since the
    /// last tick.
    async fn sample(&mut self) -> Result<Option<UsageSnapshot>>;
}

/// Reads newline-delimited JSON snapshots from a file or FIFO.
///
/// The feed is opened lazily so the agent can start before the collector
/// does; an absent file means an idle tick, not an error. A malformed line
/// fails that cycle only.
pub struct JsonFeedSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
}

impl JsonFeedSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: None,
        }
    }

    async fn ensure_open(&mut self) -> Result<bool> {
        if self.lines.is_some() {
            return Ok(true);
        }
        match File::open(&self.path).await {
            Ok(file) => {
                info!(path = %self.path.display(), "Snapshot feed opened");
                self.lines = Some(BufReader::new(file).lines());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Snapshot feed not present yet");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| {
                format!("failed to open snapshot feed {}", self.path.display())
            }),
        }
    }
}

#[async_trait]
impl SnapshotSource for JsonFeedSource {
    async fn sample(&mut self) -> Result<Option<UsageSnapshot>> {
        if !self.ensure_open().await? {
            return Ok(None);
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };

        loop {
            match lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let snapshot = serde_json::from_str(&line)
                        .context("malformed snapshot line in feed")?;
                    return Ok(Some(snapshot));
                }
                None => return Ok(None),
            }
        }
    }
}
