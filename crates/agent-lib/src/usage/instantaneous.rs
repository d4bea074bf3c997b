//! Sampled instantaneous cpu usage

use super::{ExtractionError, UsageExtractor};
use crate::models::ExecutorUsage;

/// Returns the collector-sampled usage reading as-is.
///
/// Stateless; the cheapest strategy when the telemetry collector already
/// samples usage in cores.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantaneousCpu;

impl UsageExtractor for InstantaneousCpu {
    fn extract(&mut self, executor: &ExecutorUsage) -> Result<f64, ExtractionError> {
        let stats = executor
            .statistics
            .as_ref()
            .ok_or(ExtractionError::MissingStatistics)?;
        let value = stats
            .cpus_usage_cores
            .ok_or(ExtractionError::MissingSample)?;
        if !value.is_finite() || value < 0.0 {
            return Err(ExtractionError::InvalidSample(value));
        }
        Ok(value)
    }
}
