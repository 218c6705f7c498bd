use std::time::Duration;

use crate::retry::RetryStrategy;

const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// Configuration for the [`AdmissionQueue`](crate::AdmissionQueue).
///
/// # Examples
///
/// ```
/// use tollgate_executor::AdmissionConfig;
///
/// let config = AdmissionConfig::default();
/// assert_eq!(config.max_retries, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    /// Dispatches per second. Fractional values are allowed (0.5 = one call
    /// every two seconds).
    pub rate_per_second: f64,
    /// Retries after the first attempt before the caller sees the failure.
    pub max_retries: u32,
    /// Delay between retries of the same task.
    pub retry_strategy: RetryStrategy,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Pending tasks beyond this are rejected with `QueueFull`.
    pub max_pending: usize,
    /// How long a caller waits for its task to finish before giving up.
    pub admission_timeout: Option<Duration>,
    /// Provider retry-after hints longer than this are cut down to it.
    pub max_retry_after: Duration,
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_rate(self.rate_per_second)?;
        if self.max_pending == 0 {
            return Err("max_pending must be >= 1".into());
        }
        if self.attempt_timeout.is_zero() {
            return Err("attempt_timeout must be > 0".into());
        }
        if self.max_retry_after.is_zero() {
            return Err("max_retry_after must be > 0".into());
        }
        Ok(())
    }
}

/// Slowest accepted admission rate: one dispatch per day.
pub const MIN_RATE_PER_SECOND: f64 = 1.0 / 86_400.0;

pub(crate) fn validate_rate(rate: f64) -> Result<(), String> {
    if rate.is_finite() && rate >= MIN_RATE_PER_SECOND {
        Ok(())
    } else {
        Err(format!(
            "rate_per_second must be a finite number >= {MIN_RATE_PER_SECOND}, got {rate}"
        ))
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 1.0,
            max_retries: 3,
            retry_strategy: RetryStrategy::default(),
            attempt_timeout: Duration::from_secs(60),
            max_pending: 1_000,
            admission_timeout: None,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

/// Configuration for the [`DeliveryQueue`](crate::DeliveryQueue).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Deliveries allowed per window.
    pub max_per_window: u32,
    /// Length of the rate window.
    pub window: Duration,
    /// Retries after the first attempt before a message is dead-lettered.
    pub max_retries: u32,
    /// Delay between retries of the same message.
    pub retry_strategy: RetryStrategy,
    /// Queue capacity; the lowest-priority oldest message is dropped beyond it.
    pub max_queue_size: usize,
    /// Provider retry-after hints longer than this are cut down to it.
    pub max_retry_after: Duration,
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_per_window == 0 {
            return Err("max_per_window must be >= 1".into());
        }
        if self.window.is_zero() {
            return Err("window must be > 0".into());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be >= 1".into());
        }
        if self.max_retry_after.is_zero() {
            return Err("max_retry_after must be > 0".into());
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_per_window: 20,
            window: Duration::from_secs(60),
            max_retries: 3,
            retry_strategy: RetryStrategy::exponential(
                Duration::from_secs(2),
                Duration::from_secs(300),
            ),
            max_queue_size: 1_000,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AdmissionConfig::default().validate().is_ok());
        assert!(DeliveryConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-20, MIN_RATE_PER_SECOND / 2.0] {
            let cfg = AdmissionConfig {
                rate_per_second: rate,
                ..AdmissionConfig::default()
            };
            assert!(cfg.validate().is_err(), "rate {rate} should be rejected");
        }
    }

    #[test]
    fn accepts_one_dispatch_per_day() {
        let cfg = AdmissionConfig {
            rate_per_second: MIN_RATE_PER_SECOND,
            ..AdmissionConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_retry_after_cap() {
        let admission = AdmissionConfig {
            max_retry_after: Duration::ZERO,
            ..AdmissionConfig::default()
        };
        assert!(admission.validate().is_err());

        let delivery = DeliveryConfig {
            max_retry_after: Duration::ZERO,
            ..DeliveryConfig::default()
        };
        assert!(delivery.validate().is_err());
    }

    #[test]
    fn rejects_empty_window() {
        let cfg = DeliveryConfig {
            max_per_window: 0,
            ..DeliveryConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
