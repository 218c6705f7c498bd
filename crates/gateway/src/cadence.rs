use std::time::Duration;

use serde::Serialize;

/// Totals from one monitor cycle that drive the next cycle's interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Source calls that reached a result.
    pub calls: u64,
    /// Failed calls among `calls`.
    pub errors: u64,
    /// Items returned by the source.
    pub items: u64,
}

impl CycleStats {
    /// Fraction of calls that failed; zero when nothing was called.
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}

/// Adaptive polling cadence.
///
/// The next interval starts from `base_interval` and applies three
/// independent adjustments, each clamped to `[min_interval, max_interval]`:
///
/// | Condition | Adjustment |
/// |-----------|------------|
/// | error rate above `error_rate_threshold` | doubled |
/// | items above `high_watermark` | halved |
/// | items below `low_watermark` | multiplied by 1.5 |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tollgate_gateway::{CadenceConfig, CycleStats};
///
/// let cadence = CadenceConfig::default();
/// let busy = CycleStats { calls: 10, errors: 0, items: 500 };
/// assert_eq!(cadence.next_interval(&busy), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CadenceConfig {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub error_rate_threshold: f64,
    pub high_watermark: u64,
    pub low_watermark: u64,
}

impl CadenceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_interval.is_zero() {
            return Err("min_interval must be > 0".into());
        }
        if self.min_interval > self.max_interval {
            return Err("min_interval must not exceed max_interval".into());
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(format!(
                "error_rate_threshold must be within [0, 1], got {}",
                self.error_rate_threshold
            ));
        }
        if self.low_watermark > self.high_watermark {
            return Err("low_watermark must not exceed high_watermark".into());
        }
        Ok(())
    }

    /// Interval to wait before the cycle after one that produced `stats`.
    pub fn next_interval(&self, stats: &CycleStats) -> Duration {
        let clamp = |d: Duration| d.clamp(self.min_interval, self.max_interval);
        let mut interval = clamp(self.base_interval);

        if stats.error_rate() > self.error_rate_threshold {
            interval = clamp(interval.saturating_mul(2));
        }
        if stats.items > self.high_watermark {
            interval = clamp(interval / 2);
        }
        if stats.items < self.low_watermark {
            interval = clamp(interval.mul_f64(1.5));
        }
        interval
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(600),
            error_rate_threshold: 0.10,
            high_watermark: 50,
            low_watermark: 5,
        }
    }
}
