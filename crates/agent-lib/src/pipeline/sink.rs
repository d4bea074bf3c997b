//! Terminal pipeline stage
//!
//! Publishes each cycle's contention list for the HTTP API and logs the
//! emitted signals. An empty cycle overwrites the previous one; contention
//! events are never carried forward.

use super::{async_trait, Contentions, Stage};
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cloneable read handle onto the most recent cycle's contentions.
#[derive(Clone, Default)]
pub struct ContentionFeed {
    latest: Arc<RwLock<Contentions>>,
}

impl ContentionFeed {
    /// The contention list from the last completed cycle.
    pub async fn latest(&self) -> Contentions {
        self.latest.read().await.clone()
    }
}

/// Terminal stage recording the latest contentions.
pub struct ContentionSink {
    feed: ContentionFeed,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl ContentionSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self {
            feed: ContentionFeed::default(),
            logger,
            metrics: AgentMetrics::new(),
        }
    }

    /// Handle for readers (the HTTP API) to observe emitted contentions.
    pub fn feed(&self) -> ContentionFeed {
        self.feed.clone()
    }
}

#[async_trait]
impl Stage<Contentions> for ContentionSink {
    async fn consume(&mut self, input: &Contentions) -> Result<()> {
        for contention in input {
            self.logger
                .log_contention(contention.kind.as_str(), contention.magnitude);
        }
        self.metrics.inc_contentions_by(input.len() as u64);
        *self.feed.latest.write().await = input.clone();
        Ok(())
    }
}
