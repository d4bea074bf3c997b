//! Smoothed cpu usage
//!
//! Decorates another extraction strategy with a per-executor exponentially
//! weighted moving average, damping short spikes before they reach the
//! threshold policy.

use super::{state_key, ExtractionError, UsageExtractor};
use crate::models::ExecutorUsage;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

struct EwmaState {
    value: f64,
    timestamp_secs: f64,
}

/// EWMA smoothing over any inner extraction strategy.
///
/// The first successful inner sample seeds the average. Per-executor state
/// follows the same staleness eviction contract as the rate strategy.
pub struct EwmaCpu {
    alpha: f64,
    inner: Box<dyn UsageExtractor>,
    state: HashMap<String, EwmaState>,
    stale_after_secs: f64,
    newest_seen_secs: f64,
}

impl EwmaCpu {
    /// `alpha` is the weight of the newest sample, in (0, 1]; 1 disables
    /// smoothing.
    pub fn new(alpha: f64, inner: Box<dyn UsageExtractor>) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            anyhow::bail!("ewma alpha must be in (0, 1], got {alpha}");
        }
        Ok(Self {
            alpha,
            inner,
            state: HashMap::new(),
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs_f64(),
            newest_seen_secs: 0.0,
        })
    }

    /// Override the staleness window for state eviction.
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after_secs = window.as_secs_f64();
        self
    }

    fn evict_stale(&mut self) {
        let cutoff = self.newest_seen_secs - self.stale_after_secs;
        self.state.retain(|_, s| s.timestamp_secs >= cutoff);
    }
}

impl UsageExtractor for EwmaCpu {
    fn extract(&mut self, executor: &ExecutorUsage) -> Result<f64, ExtractionError> {
        let key = state_key(executor)?;
        let timestamp_secs = executor
            .statistics
            .as_ref()
            .ok_or(ExtractionError::MissingStatistics)?
            .timestamp_secs;

        // Inner failure leaves this executor's average untouched.
        let raw = self.inner.extract(executor)?;

        if timestamp_secs > self.newest_seen_secs {
            self.newest_seen_secs = timestamp_secs;
        }
        self.evict_stale();

        let smoothed = match self.state.get(&key) {
            Some(previous) => self.alpha * raw + (1.0 - self.alpha) * previous.value,
            None => raw,
        };
        self.state.insert(
            key,
            EwmaState {
                value: smoothed,
                timestamp_secs,
            },
        );
        Ok(smoothed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::InstantaneousCpu;
    use crate::models::{ExecutorInfo, ExecutorStatistics};

    fn executor(id: &str, timestamp_secs: f64, usage: Option<f64>) -> ExecutorUsage {
        ExecutorUsage {
            info: Some(ExecutorInfo {
                executor_id: id.to_string(),
                framework_id: "fw-1".to_string(),
            }),
            statistics: Some(ExecutorStatistics {
                timestamp_secs,
                cpus_user_time_secs: 0.0,
                cpus_system_time_secs: 0.0,
                cpus_usage_cores: usage,
                cpus_limit: 2.0,
            }),
            allocated: vec![],
        }
    }

    fn smoothed(alpha: f64) -> EwmaCpu {
        EwmaCpu::new(alpha, Box::new(InstantaneousCpu)).unwrap()
    }

    #[test]
    fn test_first_sample_seeds_average() {
        let mut extractor = smoothed(0.5);
        let value = extractor
            .extract(&executor("a", 100.0, Some(2.0)))
            .unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_arithmetic() {
        let mut extractor = smoothed(0.5);
        let _ = extractor.extract(&executor("a", 100.0, Some(1.0)));
        let value = extractor
            .extract(&executor("a", 110.0, Some(2.0)))
            .unwrap();
        // 0.5 * 2.0 + 0.5 * 1.0
        assert!((value - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_executors_smoothed_independently() {
        let mut extractor = smoothed(0.5);
        let _ = extractor.extract(&executor("a", 100.0, Some(1.0)));
        let _ = extractor.extract(&executor("b", 100.0, Some(10.0)));

        let a = extractor.extract(&executor("a", 110.0, Some(2.0))).unwrap();
        assert!((a - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_inner_failure_leaves_state_untouched() {
        let mut extractor = smoothed(0.5);
        let _ = extractor.extract(&executor("a", 100.0, Some(1.0)));

        assert!(extractor.extract(&executor("a", 110.0, None)).is_err());

        // The failed cycle did not shift the average
        let value = extractor
            .extract(&executor("a", 120.0, Some(1.0)))
            .unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_state_evicted() {
        let mut extractor = smoothed(0.5).with_stale_after(Duration::from_secs(60));
        let _ = extractor.extract(&executor("a", 100.0, Some(1.0)));
        let _ = extractor.extract(&executor("b", 400.0, Some(1.0)));

        // Executor a's average is gone; the next sample re-seeds it
        let value = extractor
            .extract(&executor("a", 401.0, Some(3.0)))
            .unwrap();
        assert!((value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_validation() {
        assert!(EwmaCpu::new(0.0, Box::new(InstantaneousCpu)).is_err());
        assert!(EwmaCpu::new(1.5, Box::new(InstantaneousCpu)).is_err());
        assert!(EwmaCpu::new(1.0, Box::new(InstantaneousCpu)).is_ok());
    }
}
