//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// How per-executor cpu usage is derived from raw statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStrategy {
    /// Collector-sampled usage, as-is
    Instantaneous,
    /// Rate of the cumulative cpu-time counters
    Rate,
    /// Exponentially smoothed sampled usage
    Ewma,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name, normally from the downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Detection cycle interval in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Usage/capacity fraction above which the node counts as contended.
    /// Must be in (0, 1]; 0.8-0.95 is the sensible range for cpu.
    #[serde(default = "default_utilization_threshold")]
    pub utilization_threshold: f64,

    /// Usage extraction strategy for the cpu detector
    #[serde(default = "default_usage_strategy")]
    pub usage_strategy: UsageStrategy,

    /// Smoothing factor when `usage_strategy` is `ewma`
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Newline-delimited JSON snapshot feed from the telemetry collector
    #[serde(default = "default_snapshot_feed")]
    pub snapshot_feed: String,

    /// When set, detection is delegated to this external program instead of
    /// the native detector
    #[serde(default)]
    pub external_command: Option<String>,

    /// Timeout for one exchange with the external program
    #[serde(default = "default_external_timeout")]
    pub external_timeout_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cycle_interval() -> u64 {
    5
}

fn default_utilization_threshold() -> f64 {
    0.9
}

fn default_usage_strategy() -> UsageStrategy {
    UsageStrategy::Instantaneous
}

fn default_ewma_alpha() -> f64 {
    0.2
}

fn default_snapshot_feed() -> String {
    "/var/run/oversub/usage.jsonl".to_string()
}

fn default_external_timeout() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            cycle_interval_secs: default_cycle_interval(),
            utilization_threshold: default_utilization_threshold(),
            usage_strategy: default_usage_strategy(),
            ewma_alpha: default_ewma_alpha(),
            snapshot_feed: default_snapshot_feed(),
            external_command: None,
            external_timeout_secs: default_external_timeout(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OVERSUB"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}
