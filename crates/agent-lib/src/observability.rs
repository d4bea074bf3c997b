//! Observability infrastructure for the oversubscription agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, skip/error counters, utilization gauges)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    detection_latency_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_errors_total: IntCounter,
    executors_skipped_total: IntCounter,
    extraction_errors_total: IntCounter,
    contentions_total: IntCounter,
    overutilized_no_revocable_total: IntCounter,
    utilization_level: Gauge,
    revocable_executors: IntGauge,
    snapshot_executors: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            detection_latency_seconds: register_histogram!(
                "oversub_agent_detection_latency_seconds",
                "Time spent running one detection cycle over a snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            cycles_total: register_int_counter!(
                "oversub_agent_cycles_total",
                "Total number of detection cycles started"
            )
            .expect("Failed to register cycles_total"),

            cycle_errors_total: register_int_counter!(
                "oversub_agent_cycle_errors_total",
                "Detection cycles aborted on a structurally unusable snapshot"
            )
            .expect("Failed to register cycle_errors_total"),

            executors_skipped_total: register_int_counter!(
                "oversub_agent_executors_skipped_total",
                "Executor records excluded for missing info or statistics"
            )
            .expect("Failed to register executors_skipped_total"),

            extraction_errors_total: register_int_counter!(
                "oversub_agent_extraction_errors_total",
                "Executor records excluded because usage extraction failed"
            )
            .expect("Failed to register extraction_errors_total"),

            contentions_total: register_int_counter!(
                "oversub_agent_contentions_total",
                "Total number of contention events emitted downstream"
            )
            .expect("Failed to register contentions_total"),

            overutilized_no_revocable_total: register_int_counter!(
                "oversub_agent_overutilized_no_revocable_total",
                "Cycles above the utilization threshold with no revocable executor to act on"
            )
            .expect("Failed to register overutilized_no_revocable_total"),

            utilization_level: register_gauge!(
                "oversub_agent_utilization_level",
                "Aggregated cpu usage divided by node cpu capacity, last cycle"
            )
            .expect("Failed to register utilization_level"),

            revocable_executors: register_int_gauge!(
                "oversub_agent_revocable_executors",
                "Executors with a revocable grant counted in the last cycle"
            )
            .expect("Failed to register revocable_executors"),

            snapshot_executors: register_int_gauge!(
                "oversub_agent_snapshot_executors",
                "Executor records present in the last snapshot"
            )
            .expect("Failed to register snapshot_executors"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a detection cycle latency observation
    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    /// Count a started detection cycle
    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    /// Count a cycle aborted on a structural error
    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors_total.inc();
    }

    /// Count an executor record excluded for missing fields
    pub fn inc_executors_skipped(&self) {
        self.inner().executors_skipped_total.inc();
    }

    /// Count an executor record excluded on extraction failure
    pub fn inc_extraction_errors(&self) {
        self.inner().extraction_errors_total.inc();
    }

    /// Count contention events emitted downstream
    pub fn inc_contentions_by(&self, count: u64) {
        self.inner().contentions_total.inc_by(count);
    }

    /// Count an over-threshold cycle with nothing revocable to act on
    pub fn inc_overutilized_no_revocable(&self) {
        self.inner().overutilized_no_revocable_total.inc();
    }

    /// Current value of the no-revocable counter
    pub fn overutilized_no_revocable_count(&self) -> u64 {
        self.inner().overutilized_no_revocable_total.get()
    }

    /// Update the last-cycle utilization gauge
    pub fn set_utilization_level(&self, level: f64) {
        self.inner().utilization_level.set(level);
    }

    /// Update the last-cycle revocable executor gauge
    pub fn set_revocable_executors(&self, count: i64) {
        self.inner().revocable_executors.set(count);
    }

    /// Update the last-snapshot executor count gauge
    pub fn set_snapshot_executors(&self, count: i64) {
        self.inner().snapshot_executors.set(count);
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for contention signals and
/// lifecycle events, tagged with the node the agent runs on.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a contention event handed to the downstream consumer
    pub fn log_contention(&self, kind: &str, magnitude: f64) {
        warn!(
            event = "contention_emitted",
            node = %self.node_name,
            kind = %kind,
            magnitude = magnitude,
            "Contention signal emitted"
        );
    }

    /// Log a detection cycle that aborted on an unusable snapshot
    pub fn log_cycle_failed(&self, error: &str) {
        error!(
            event = "cycle_failed",
            node = %self.node_name,
            error = %error,
            "Detection cycle failed"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            "Oversubscription agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Oversubscription agent shutting down"
        );
    }
}
