//! CPU contention detection
//!
//! Aggregates per-executor cpu usage through the injected extraction
//! strategy and emits a contention signal when node utilization crosses the
//! configured threshold while revocable work is running.

use crate::models::{Contention, UsageSnapshot};
use crate::observability::AgentMetrics;
use crate::pipeline::{async_trait, Contentions, Stage};
use crate::usage::UsageExtractor;
use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A snapshot that cannot be assessed at all.
///
/// Per-executor problems are not in this taxonomy; those are recovered
/// record by record inside the cycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("usage snapshot carries no node totals")]
    MissingTotal,
    #[error("node totals carry no usable cpu capacity")]
    MissingCpuTotal,
}

/// Aggregation outcome of one detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAssessment {
    pub total_cpus: f64,
    pub used_cpus: f64,
    pub utilization_level: f64,
    /// Executors with a revocable grant among the records that contributed
    /// usage this cycle.
    pub revocable_count: u64,
    /// Records excluded for missing fields or failed extraction.
    pub excluded_count: u64,
    pub over_threshold: bool,
    pub contentions: Contentions,
}

impl CycleAssessment {
    /// Above the threshold with no revocable workload to act on. Emits
    /// nothing, but is a distinct outcome from an under-threshold cycle.
    pub fn overutilized_without_revocable(&self) -> bool {
        self.over_threshold && self.revocable_count == 0
    }
}

/// Pipeline stage detecting cpu contention on one node.
pub struct CpuContentionDetector {
    utilization_threshold: f64,
    extractor: Box<dyn UsageExtractor>,
    downstream: Box<dyn Stage<Contentions>>,
    metrics: AgentMetrics,
}

impl CpuContentionDetector {
    /// `utilization_threshold` is the usage/capacity fraction above which
    /// the node counts as contended; must be in (0, 1].
    pub fn new(
        utilization_threshold: f64,
        extractor: Box<dyn UsageExtractor>,
        downstream: Box<dyn Stage<Contentions>>,
    ) -> Result<Self> {
        if !(utilization_threshold > 0.0 && utilization_threshold <= 1.0) {
            anyhow::bail!(
                "utilization threshold must be in (0, 1], got {utilization_threshold}"
            );
        }
        Ok(Self {
            utilization_threshold,
            extractor,
            downstream,
            metrics: AgentMetrics::new(),
        })
    }

    /// Run the aggregation and threshold policy over one snapshot.
    ///
    /// Exposed separately from `consume` so the outcome can be inspected
    /// without a downstream in place.
    pub fn assess(
        &mut self,
        snapshot: &UsageSnapshot,
    ) -> std::result::Result<CycleAssessment, DetectionError> {
        let total = snapshot
            .total
            .as_ref()
            .ok_or(DetectionError::MissingTotal)?;
        // A zero or garbage capacity is as unusable as a missing one, and
        // refusing it here keeps the division below well defined.
        let total_cpus = match total.cpus {
            Some(cpus) if cpus.is_finite() && cpus > 0.0 => cpus,
            _ => return Err(DetectionError::MissingCpuTotal),
        };

        let mut used_cpus = 0.0_f64;
        let mut revocable_count = 0u64;
        let mut excluded_count = 0u64;

        for executor in &snapshot.executors {
            if executor.info.is_none() || executor.statistics.is_none() {
                let reason = if executor.info.is_none() {
                    "missing info"
                } else {
                    "missing statistics"
                };
                warn!(
                    event = "executor_excluded",
                    executor = %executor.display_id(),
                    reason = reason,
                    "Executor record excluded from aggregation"
                );
                self.metrics.inc_executors_skipped();
                excluded_count += 1;
                continue;
            }

            let value = match self.extractor.extract(executor) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        event = "extraction_failed",
                        executor = %executor.display_id(),
                        error = %e,
                        "Usage extraction failed, record excluded"
                    );
                    self.metrics.inc_extraction_errors();
                    excluded_count += 1;
                    continue;
                }
            };

            used_cpus += value;
            if executor.is_revocable() {
                revocable_count += 1;
            }
        }

        let utilization_level = used_cpus / total_cpus;
        let over_threshold = utilization_level > self.utilization_threshold;
        debug!(
            used_cpus = used_cpus,
            total_cpus = total_cpus,
            level = utilization_level,
            "Cycle aggregated"
        );

        let mut contentions = Contentions::new();
        if over_threshold {
            if revocable_count == 0 {
                info!(
                    event = "overutilization_without_revocable",
                    node = %snapshot.node_name,
                    level = utilization_level,
                    used_cpus = used_cpus,
                    total_cpus = total_cpus,
                    "Node over the utilization threshold with no revocable work to act on"
                );
                self.metrics.inc_overutilized_no_revocable();
            } else {
                info!(
                    event = "cpu_contention_detected",
                    node = %snapshot.node_name,
                    level = utilization_level,
                    used_cpus = used_cpus,
                    total_cpus = total_cpus,
                    revocable_executors = revocable_count,
                    "CPU utilization above threshold, emitting contention"
                );
                contentions.push(Contention::cpu(total_cpus - used_cpus));
            }
        }

        Ok(CycleAssessment {
            total_cpus,
            used_cpus,
            utilization_level,
            revocable_count,
            excluded_count,
            over_threshold,
            contentions,
        })
    }
}

#[async_trait]
impl Stage<UsageSnapshot> for CpuContentionDetector {
    async fn consume(&mut self, snapshot: &UsageSnapshot) -> Result<()> {
        let assessment = self.assess(snapshot)?;

        self.metrics
            .set_utilization_level(assessment.utilization_level);
        self.metrics
            .set_revocable_executors(assessment.revocable_count as i64);
        self.metrics
            .set_snapshot_executors(snapshot.executors.len() as i64);

        self.downstream.consume(&assessment.contentions).await?;
        Ok(())
    }
}
