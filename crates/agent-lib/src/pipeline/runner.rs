//! Detection cycle driver
//!
//! Runs the pipeline head on a periodic timer: each tick pulls at most one
//! snapshot from the source and pushes it through the chain. Structural
//! failures are logged and counted; after enough consecutive failures the
//! pipeline health component degrades until a cycle succeeds again.

use super::{SnapshotSource, Stage};
use crate::health::{components, HealthRegistry};
use crate::models::UsageSnapshot;
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::Result;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

/// Configuration for the detection cycle loop
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Base cycle interval (default: 5 seconds)
    pub interval: Duration,
    /// Maximum jitter added to the interval (default: 500 ms)
    pub jitter: Duration,
    /// Consecutive failed cycles before the pipeline degrades (default: 3)
    pub failure_threshold: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
            failure_threshold: 3,
        }
    }
}

/// Periodic loop feeding snapshots into the pipeline head
pub struct DetectionLoop {
    source: Box<dyn SnapshotSource>,
    head: Box<dyn Stage<UsageSnapshot>>,
    config: CycleConfig,
    logger: StructuredLogger,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
    consecutive_failures: u32,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn SnapshotSource>,
        head: Box<dyn Stage<UsageSnapshot>>,
        config: CycleConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            head,
            config,
            logger,
            metrics: AgentMetrics::new(),
            health: None,
            consecutive_failures: 0,
        }
    }

    /// Report pipeline state into the given health registry.
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        // Jitter keeps a fleet of agents from sampling in lockstep.
        let period =
            self.config.interval + Duration::from_millis(tick_jitter(self.config.jitter.as_millis() as u64));
        info!(
            interval_ms = period.as_millis() as u64,
            "Starting detection cycle loop"
        );

        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down detection cycle loop");
                    break;
                }
            }
        }
    }

    /// One tick: pull a snapshot if any is pending and push it through.
    async fn run_cycle(&mut self) {
        let snapshot = match self.source.sample().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No snapshot pending this tick");
                return;
            }
            Err(e) => {
                self.metrics.inc_cycle_errors();
                self.logger.log_cycle_failed(&format!("{e:#}"));
                self.record_failure().await;
                return;
            }
        };

        self.metrics.inc_cycles();
        let start = Instant::now();

        match self.head.consume(&snapshot).await {
            Ok(()) => {
                self.metrics
                    .observe_detection_latency(start.elapsed().as_secs_f64());
                self.record_success().await;
            }
            Err(e) => {
                self.metrics.inc_cycle_errors();
                self.logger.log_cycle_failed(&format!("{e:#}"));
                self.record_failure().await;
            }
        }
    }

    async fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures == self.config.failure_threshold {
            if let Some(health) = &self.health {
                health
                    .set_degraded(
                        components::PIPELINE,
                        format!("{} consecutive failed cycles", self.consecutive_failures),
                    )
                    .await;
            }
        }
    }

    async fn record_success(&mut self) {
        if self.consecutive_failures >= self.config.failure_threshold {
            if let Some(health) = &self.health {
                health.set_healthy(components::PIPELINE).await;
            }
        }
        self.consecutive_failures = 0;
    }
}

/// Generate a jitter value between 0 and max_ms from the wallclock
fn tick_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    now % max_ms
}

/// Builder for wiring up the detection loop
pub struct DetectionLoopBuilder {
    source: Option<Box<dyn SnapshotSource>>,
    head: Option<Box<dyn Stage<UsageSnapshot>>>,
    config: CycleConfig,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl DetectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            head: None,
            config: CycleConfig::default(),
            logger: None,
            health: None,
        }
    }

    pub fn source(mut self, source: Box<dyn SnapshotSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn head(mut self, head: Box<dyn Stage<UsageSnapshot>>) -> Self {
        self.head = Some(head);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn failure_threshold(mut self, cycles: u32) -> Self {
        self.config.failure_threshold = cycles;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<DetectionLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Snapshot source is required"))?;
        let head = self
            .head
            .ok_or_else(|| anyhow::anyhow!("Pipeline head is required"))?;
        let logger = self
            .logger
            .ok_or_else(|| anyhow::anyhow!("Logger is required"))?;

        let mut detection_loop = DetectionLoop::new(source, head, self.config, logger);
        if let Some(health) = self.health {
            detection_loop = detection_loop.with_health(health);
        }
        Ok(detection_loop)
    }
}

impl Default for DetectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::async_trait;
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::NodeResources;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot(node: &str) -> UsageSnapshot {
        UsageSnapshot {
            node_name: node.to_string(),
            timestamp: 0,
            total: Some(NodeResources {
                cpus: Some(8.0),
                memory_bytes: None,
            }),
            executors: vec![],
        }
    }

    /// Source yielding a fixed queue of results.
    struct QueueSource {
        queue: VecDeque<Result<Option<UsageSnapshot>>>,
    }

    #[async_trait]
    impl SnapshotSource for QueueSource {
        async fn sample(&mut self) -> Result<Option<UsageSnapshot>> {
            self.queue.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Stage counting consumes, optionally failing every call.
    struct CountingStage {
        consumed: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Stage<UsageSnapshot> for CountingStage {
        async fn consume(&mut self, _input: &UsageSnapshot) -> Result<()> {
            self.consumed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("stage failure");
            }
            Ok(())
        }
    }

    fn test_loop(
        results: Vec<Result<Option<UsageSnapshot>>>,
        fail: bool,
    ) -> (DetectionLoop, Arc<AtomicUsize>) {
        let consumed = Arc::new(AtomicUsize::new(0));
        let stage = CountingStage {
            consumed: consumed.clone(),
            fail,
        };
        let detection_loop = DetectionLoop::new(
            Box::new(QueueSource {
                queue: results.into(),
            }),
            Box::new(stage),
            CycleConfig {
                failure_threshold: 2,
                ..CycleConfig::default()
            },
            StructuredLogger::new("test-node"),
        );
        (detection_loop, consumed)
    }

    #[tokio::test]
    async fn test_cycle_feeds_snapshot_to_head() {
        let (mut detection_loop, consumed) = test_loop(vec![Ok(Some(snapshot("a")))], false);
        detection_loop.run_cycle().await;
        assert_eq!(consumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_tick_skips_head() {
        let (mut detection_loop, consumed) = test_loop(vec![Ok(None)], false);
        detection_loop.run_cycle().await;
        assert_eq!(consumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_consecutive_failures_degrade_pipeline() {
        let health = HealthRegistry::new();
        health.register(components::PIPELINE).await;

        let (detection_loop, _consumed) = test_loop(
            vec![Ok(Some(snapshot("a"))), Ok(Some(snapshot("a")))],
            true,
        );
        let mut detection_loop = detection_loop.with_health(health.clone());

        detection_loop.run_cycle().await;
        detection_loop.run_cycle().await;

        let report = health.health().await;
        assert_eq!(report.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_successful_cycle_restores_pipeline() {
        let health = HealthRegistry::new();
        health.register(components::PIPELINE).await;

        let source: Vec<Result<Option<UsageSnapshot>>> = vec![
            Err(anyhow::anyhow!("bad feed")),
            Err(anyhow::anyhow!("bad feed")),
            Ok(Some(snapshot("a"))),
        ];
        let (detection_loop, _consumed) = test_loop(source, false);
        let mut detection_loop = detection_loop.with_health(health.clone());

        detection_loop.run_cycle().await;
        detection_loop.run_cycle().await;
        assert_eq!(health.health().await.status, ComponentStatus::Degraded);

        detection_loop.run_cycle().await;
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_builder_requires_source_and_head() {
        let result = DetectionLoopBuilder::new()
            .logger(StructuredLogger::new("test-node"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_tick_jitter_bounds() {
        assert!(tick_jitter(1000) < 1000);
        assert_eq!(tick_jitter(0), 0);
    }
}
