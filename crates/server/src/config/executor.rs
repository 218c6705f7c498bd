use std::time::Duration;

use serde::Deserialize;
use tollgate_executor::{
    AdmissionConfig, CircuitBreakerConfig, CooldownConfig, DeliveryConfig, RetryStrategy,
};

/// Source call throttling.
///
/// # Example
///
/// ```toml
/// [admission]
/// rate_per_second = 0.5
/// max_retries = 2
/// ```
#[derive(Debug, Deserialize)]
pub struct AdmissionServerConfig {
    /// Source calls per second. Fractional rates are allowed.
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,
    /// Retries of a failed source call before the scheduler sees the error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "default_admission_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "default_admission_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Upper bound on a single source call in seconds.
    #[serde(default = "default_attempt_timeout_seconds")]
    pub attempt_timeout_seconds: u64,
    /// Pending calls beyond this are rejected.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// How long a caller waits for its call before giving up.
    pub admission_timeout_seconds: Option<u64>,
    /// Cap on provider retry-after hints in seconds.
    #[serde(default = "default_max_retry_after_seconds")]
    pub max_retry_after_seconds: u64,
}

impl AdmissionServerConfig {
    pub fn to_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            rate_per_second: self.rate_per_second,
            max_retries: self.max_retries,
            retry_strategy: RetryStrategy::exponential(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_seconds),
            max_pending: self.max_pending,
            admission_timeout: self.admission_timeout_seconds.map(Duration::from_secs),
            max_retry_after: Duration::from_secs(self.max_retry_after_seconds),
        }
    }
}

impl Default for AdmissionServerConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate_per_second(),
            max_retries: default_max_retries(),
            retry_base_ms: default_admission_retry_base_ms(),
            retry_max_ms: default_admission_retry_max_ms(),
            attempt_timeout_seconds: default_attempt_timeout_seconds(),
            max_pending: default_max_pending(),
            admission_timeout_seconds: None,
            max_retry_after_seconds: default_max_retry_after_seconds(),
        }
    }
}

fn default_rate_per_second() -> f64 {
    1.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_admission_retry_base_ms() -> u64 {
    1_000
}

fn default_admission_retry_max_ms() -> u64 {
    60_000
}

fn default_attempt_timeout_seconds() -> u64 {
    60
}

fn default_max_pending() -> usize {
    1_000
}

fn default_max_retry_after_seconds() -> u64 {
    900
}

/// Sink delivery pacing and retries.
///
/// # Example
///
/// ```toml
/// [delivery]
/// max_per_window = 20
/// window_seconds = 60
/// persistent_dead_letters = true
/// ```
#[derive(Debug, Deserialize)]
pub struct DeliveryServerConfig {
    /// Deliveries allowed per window.
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,
    /// Length of the rate window in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Retries before a message is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delivery_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_delivery_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Queue capacity before the lowest-priority message is dropped.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Cap on provider retry-after hints in seconds.
    #[serde(default = "default_max_retry_after_seconds")]
    pub max_retry_after_seconds: u64,
    /// Keep dead letters in the state store rather than in memory.
    #[serde(default)]
    pub persistent_dead_letters: bool,
}

impl DeliveryServerConfig {
    pub fn to_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_per_window: self.max_per_window,
            window: Duration::from_secs(self.window_seconds),
            max_retries: self.max_retries,
            retry_strategy: RetryStrategy::exponential(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ),
            max_queue_size: self.max_queue_size,
            max_retry_after: Duration::from_secs(self.max_retry_after_seconds),
        }
    }
}

impl Default for DeliveryServerConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window_seconds: default_window_seconds(),
            max_retries: default_max_retries(),
            retry_base_ms: default_delivery_retry_base_ms(),
            retry_max_ms: default_delivery_retry_max_ms(),
            max_queue_size: default_max_queue_size(),
            max_retry_after_seconds: default_max_retry_after_seconds(),
            persistent_dead_letters: false,
        }
    }
}

fn default_max_per_window() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_delivery_retry_base_ms() -> u64 {
    2_000
}

fn default_delivery_retry_max_ms() -> u64 {
    300_000
}

fn default_max_queue_size() -> usize {
    1_000
}

/// Breaker settings shared by the source and the sink breaker.
#[derive(Debug, Deserialize)]
pub struct CircuitBreakerServerConfig {
    /// Consecutive transient failures before the circuit opens.
    #[serde(default = "default_cb_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call is allowed.
    #[serde(default = "default_cb_reset_timeout")]
    pub reset_timeout_seconds: u64,
    /// Minimum seconds between half-open trial calls.
    #[serde(default = "default_cb_test_interval")]
    pub test_interval_seconds: u64,
    /// Upper bound on a single protected call in seconds.
    #[serde(default = "default_cb_call_timeout")]
    pub call_timeout_seconds: u64,
}

impl CircuitBreakerServerConfig {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
            test_interval: Duration::from_secs(self.test_interval_seconds),
            call_timeout: Duration::from_secs(self.call_timeout_seconds),
        }
    }
}

impl Default for CircuitBreakerServerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_cb_failure_threshold(),
            reset_timeout_seconds: default_cb_reset_timeout(),
            test_interval_seconds: default_cb_test_interval(),
            call_timeout_seconds: default_cb_call_timeout(),
        }
    }
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_reset_timeout() -> u64 {
    60
}

fn default_cb_test_interval() -> u64 {
    10
}

fn default_cb_call_timeout() -> u64 {
    30
}

/// Process-wide throttle backoff.
#[derive(Debug, Deserialize)]
pub struct CooldownServerConfig {
    /// Backoff applied when a throttled response carries no hint.
    #[serde(default = "default_backoff_seconds")]
    pub default_backoff_seconds: u64,
    /// Upper bound on any single backoff.
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
}

impl CooldownServerConfig {
    pub fn to_config(&self) -> CooldownConfig {
        CooldownConfig {
            default_backoff: Duration::from_secs(self.default_backoff_seconds),
            max_backoff: Duration::from_secs(self.max_backoff_seconds),
        }
    }
}

impl Default for CooldownServerConfig {
    fn default() -> Self {
        Self {
            default_backoff_seconds: default_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

fn default_backoff_seconds() -> u64 {
    60
}

fn default_max_backoff_seconds() -> u64 {
    15 * 60
}
