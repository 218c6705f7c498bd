use std::time::Duration;

use serde::Deserialize;
use tollgate_gateway::{CadenceConfig, DedupConfig, SchedulerConfig};

/// Batch sizing and pacing between source calls of one stream.
#[derive(Debug, Deserialize)]
pub struct SchedulerServerConfig {
    /// Identities per search call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Default stream base delay; batches are spaced by half of it.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Spacing of per-identity calls after a batch was not supported.
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,
    /// How far each poll reaches back before the previous one.
    #[serde(default = "default_poll_overlap_seconds")]
    pub poll_overlap_seconds: u64,
}

impl SchedulerServerConfig {
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            base_delay: Duration::from_millis(self.base_delay_ms),
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            fallback_delay: Duration::from_millis(self.fallback_delay_ms),
            poll_overlap: Duration::from_secs(self.poll_overlap_seconds),
        }
    }
}

impl Default for SchedulerServerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            base_delay_ms: default_base_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            fallback_delay_ms: default_fallback_delay_ms(),
            poll_overlap_seconds: default_poll_overlap_seconds(),
        }
    }
}

fn default_batch_size() -> usize {
    25
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_fallback_delay_ms() -> u64 {
    250
}

fn default_poll_overlap_seconds() -> u64 {
    60
}

/// Adaptive interval between monitor cycles.
///
/// # Example
///
/// ```toml
/// [cadence]
/// base_interval_seconds = 120
/// high_watermark = 100
/// ```
#[derive(Debug, Deserialize)]
pub struct CadenceServerConfig {
    #[serde(default = "default_base_interval_seconds")]
    pub base_interval_seconds: u64,
    #[serde(default = "default_min_interval_seconds")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_max_interval_seconds")]
    pub max_interval_seconds: u64,
    /// Error rate above which the interval doubles.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Item count above which the interval halves.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: u64,
    /// Item count below which the interval grows by half.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: u64,
}

impl CadenceServerConfig {
    pub fn to_config(&self) -> CadenceConfig {
        CadenceConfig {
            base_interval: Duration::from_secs(self.base_interval_seconds),
            min_interval: Duration::from_secs(self.min_interval_seconds),
            max_interval: Duration::from_secs(self.max_interval_seconds),
            error_rate_threshold: self.error_rate_threshold,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
        }
    }
}

impl Default for CadenceServerConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: default_base_interval_seconds(),
            min_interval_seconds: default_min_interval_seconds(),
            max_interval_seconds: default_max_interval_seconds(),
            error_rate_threshold: default_error_rate_threshold(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
        }
    }
}

fn default_base_interval_seconds() -> u64 {
    60
}

fn default_min_interval_seconds() -> u64 {
    10
}

fn default_max_interval_seconds() -> u64 {
    600
}

fn default_error_rate_threshold() -> f64 {
    0.10
}

fn default_high_watermark() -> u64 {
    50
}

fn default_low_watermark() -> u64 {
    5
}

/// Retention of delivered-item records.
#[derive(Debug, Deserialize)]
pub struct DedupServerConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_prune_interval_seconds")]
    pub prune_interval_seconds: u64,
}

impl DedupServerConfig {
    pub fn to_config(&self) -> DedupConfig {
        DedupConfig {
            retention: Duration::from_secs(self.retention_days * 24 * 3600),
            prune_interval: Duration::from_secs(self.prune_interval_seconds),
        }
    }
}

impl Default for DedupServerConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            prune_interval_seconds: default_prune_interval_seconds(),
        }
    }
}

fn default_retention_days() -> u64 {
    30
}

fn default_prune_interval_seconds() -> u64 {
    3_600
}
