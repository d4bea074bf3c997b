//! Core data model for the contention detection pipeline

use serde::{Deserialize, Serialize};

/// One sampling cycle's view of node-wide and per-executor resource state.
///
/// Produced once per cycle by the telemetry collector. `total` must be
/// present for a snapshot to be usable; `executors` may be empty on an
/// idle node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub node_name: String,
    pub timestamp: i64,
    pub total: Option<NodeResources>,
    #[serde(default)]
    pub executors: Vec<ExecutorUsage>,
}

/// Aggregate resource capacity of the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpus: Option<f64>,
    pub memory_bytes: Option<u64>,
}

/// Per-executor slice of a usage snapshot.
///
/// A record missing either `info` or `statistics` is excluded from
/// aggregation as a whole; there is no partial use of a malformed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorUsage {
    pub info: Option<ExecutorInfo>,
    pub statistics: Option<ExecutorStatistics>,
    #[serde(default)]
    pub allocated: Vec<ResourceAllocation>,
}

impl ExecutorUsage {
    /// True if any part of this executor's grant is revocable.
    pub fn is_revocable(&self) -> bool {
        self.allocated.iter().any(|a| a.revocable)
    }

    /// Identity for logging; `<unknown>` when the info field is missing.
    pub fn display_id(&self) -> &str {
        self.info
            .as_ref()
            .map(|i| i.executor_id.as_str())
            .unwrap_or("<unknown>")
    }
}

/// Executor identity as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: String,
    pub framework_id: String,
}

/// Raw per-executor counters read at sampling time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStatistics {
    /// When the counters were read, unix seconds with fraction.
    pub timestamp_secs: f64,
    /// Cumulative cpu time spent in user mode.
    pub cpus_user_time_secs: f64,
    /// Cumulative cpu time spent in kernel mode.
    pub cpus_system_time_secs: f64,
    /// Collector-sampled instantaneous usage in cores, if the collector
    /// exposes one.
    pub cpus_usage_cores: Option<f64>,
    /// Current cpu allocation for this executor.
    pub cpus_limit: f64,
}

impl ExecutorStatistics {
    /// Total cumulative cpu time (user + system).
    pub fn cpus_total_time_secs(&self) -> f64 {
        self.cpus_user_time_secs + self.cpus_system_time_secs
    }
}

/// One entry of an executor's resource grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub cpus: f64,
    pub memory_bytes: u64,
    /// Best-effort grant that may be preempted under contention.
    pub revocable: bool,
}

/// Resource dimension a contention was detected on.
///
/// This agent emits `Cpu`; the remaining variants are reserved for sibling
/// detectors feeding the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionKind {
    Cpu,
    Memory,
    Io,
    Network,
}

impl ContentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentionKind::Cpu => "cpu",
            ContentionKind::Memory => "memory",
            ContentionKind::Io => "io",
            ContentionKind::Network => "network",
        }
    }
}

/// A detected resource-pressure event, created fresh each cycle and handed
/// downstream unchanged.
///
/// `magnitude` is the signed headroom `total - used` on the contended
/// dimension at detection time: positive while demand sits between the
/// utilization threshold and capacity, negative once demand exceeds
/// capacity. More negative means deeper overcommitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contention {
    pub kind: ContentionKind,
    pub magnitude: f64,
}

impl Contention {
    pub fn cpu(magnitude: f64) -> Self {
        Self {
            kind: ContentionKind::Cpu,
            magnitude,
        }
    }
}
