//! Usage extraction strategies
//!
//! A strategy turns one executor's raw statistics into a single cpu-usage
//! scalar, in cores. The detector is injected with a strategy at
//! construction, so deployments can swap the metric (sampled, counter rate,
//! smoothed) without touching detection control flow.

mod ewma;
mod instantaneous;
mod rate;

pub use ewma::EwmaCpu;
pub use instantaneous::InstantaneousCpu;
pub use rate::CumulativeRateCpu;

use crate::models::ExecutorUsage;
use thiserror::Error;

/// Converts one executor record into a cpu-usage scalar.
///
/// `extract` may keep per-executor state across cycles (rate and smoothed
/// strategies do); such state is keyed by executor identity and owned by
/// the strategy alone. Strategies are `Send` but not shareable across
/// concurrent cycles without external synchronization.
pub trait UsageExtractor: Send {
    fn extract(&mut self, executor: &ExecutorUsage) -> Result<f64, ExtractionError>;
}

/// Why a single executor record produced no usage value.
///
/// Extraction failures never abort a detection cycle; the detector skips
/// the record and moves on.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("executor record carries no statistics")]
    MissingStatistics,
    #[error("executor record carries no identity")]
    MissingIdentity,
    #[error("statistics carry no sampled cpu usage")]
    MissingSample,
    #[error("sampled cpu usage {0} is not a valid reading")]
    InvalidSample(f64),
    #[error("no prior sample for executor {0}")]
    NoHistory(String),
    #[error("no wallclock progress since the last sample for executor {0}")]
    NoElapsedTime(String),
    #[error("cpu time counter went backwards for executor {0}")]
    NonMonotonicCounter(String),
}

/// Key for per-executor strategy state. Executor ids are only unique within
/// a framework, so both parts go into the key.
pub(crate) fn state_key(executor: &ExecutorUsage) -> Result<String, ExtractionError> {
    let info = executor
        .info
        .as_ref()
        .ok_or(ExtractionError::MissingIdentity)?;
    Ok(format!("{}/{}", info.framework_id, info.executor_id))
}
