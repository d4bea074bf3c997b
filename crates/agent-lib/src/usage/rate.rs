//! Cpu usage from cumulative counters
//!
//! Computes usage as the cpu-time delta between consecutive sightings of an
//! executor divided by the wallclock delta between them. The first sighting
//! of an executor yields no value; that record is skipped for the cycle and
//! contributes from the next one on.

use super::{state_key, ExtractionError, UsageExtractor};
use crate::models::ExecutorUsage;
use std::collections::HashMap;
use std::time::Duration;

/// History entries not refreshed within this window (relative to the newest
/// statistics timestamp seen) are evicted, so executors that disappear
/// between cycles do not leak state.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

struct CounterSample {
    timestamp_secs: f64,
    cpu_time_secs: f64,
}

/// Counter-rate extraction strategy, stateful per executor.
pub struct CumulativeRateCpu {
    stale_after_secs: f64,
    history: HashMap<String, CounterSample>,
    newest_seen_secs: f64,
}

impl CumulativeRateCpu {
    pub fn new() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs_f64(),
            history: HashMap::new(),
            newest_seen_secs: 0.0,
        }
    }

    /// Override the staleness window for history eviction.
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after_secs = window.as_secs_f64();
        self
    }

    fn evict_stale(&mut self) {
        let cutoff = self.newest_seen_secs - self.stale_after_secs;
        self.history.retain(|_, s| s.timestamp_secs >= cutoff);
    }
}

impl Default for CumulativeRateCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageExtractor for CumulativeRateCpu {
    fn extract(&mut self, executor: &ExecutorUsage) -> Result<f64, ExtractionError> {
        let key = state_key(executor)?;
        let stats = executor
            .statistics
            .as_ref()
            .ok_or(ExtractionError::MissingStatistics)?;

        let now = stats.timestamp_secs;
        let cpu_time = stats.cpus_total_time_secs();

        if now > self.newest_seen_secs {
            self.newest_seen_secs = now;
        }
        self.evict_stale();

        // The new sample becomes the baseline whatever happens below, so a
        // rejected reading (restart, repeat) recovers on the next cycle.
        let previous = self.history.insert(
            key.clone(),
            CounterSample {
                timestamp_secs: now,
                cpu_time_secs: cpu_time,
            },
        );

        let Some(previous) = previous else {
            return Err(ExtractionError::NoHistory(key));
        };
        if cpu_time < previous.cpu_time_secs {
            return Err(ExtractionError::NonMonotonicCounter(key));
        }
        let elapsed = now - previous.timestamp_secs;
        if elapsed <= 0.0 {
            return Err(ExtractionError::NoElapsedTime(key));
        }

        Ok((cpu_time - previous.cpu_time_secs) / elapsed)
    }
}
