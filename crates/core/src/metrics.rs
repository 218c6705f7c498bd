use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Fire-and-forget metrics sink.
///
/// Implementations must never block the caller for longer than it takes to
/// update an in-memory structure; exporting is their own concern.
pub trait MetricsSink: Send + Sync {
    /// Increment the named counter by one.
    fn increment(&self, name: &str);

    /// Set the named gauge to `value`.
    fn gauge(&self, name: &str, value: f64);

    /// Record a duration sample for the named timer.
    fn timing(&self, name: &str, duration: Duration);
}

/// Metrics sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str) {}

    fn gauge(&self, _name: &str, _value: f64) {}

    fn timing(&self, _name: &str, _duration: Duration) {}
}

/// Running aggregate for one timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimingStats {
    fn record(&mut self, sample: Duration) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        self.count = self.count.saturating_add(1);
        self.total = self.total.saturating_add(sample);
    }

    /// Mean sample, or zero when nothing was recorded.
    #[must_use]
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    timings: HashMap<String, TimingStats>,
}

/// In-memory metrics sink.
///
/// Used by tests and the server binary. Counters are plain `u64` totals.
/// Timers keep a fixed-size aggregate per name, so memory stays flat for a
/// long-running monitor.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<Recorded>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Last value written to a gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauges.get(name).copied()
    }

    /// Aggregate for a timer (all zero if never recorded).
    pub fn timings(&self, name: &str) -> TimingStats {
        self.inner
            .lock()
            .timings
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Sorted copy of all timer aggregates.
    pub fn all_timings(&self) -> Vec<(String, TimingStats)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .timings
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Sorted copy of all counters.
    pub fn counters(&self) -> Vec<(String, u64)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort();
        all
    }
}

impl MetricsSink for MetricsRecorder {
    fn increment(&self, name: &str) {
        *self.inner.lock().counters.entry(name.to_owned()).or_insert(0) += 1;
    }

    fn gauge(&self, name: &str, value: f64) {
        self.inner.lock().gauges.insert(name.to_owned(), value);
    }

    fn timing(&self, name: &str, duration: Duration) {
        self.inner
            .lock()
            .timings
            .entry(name.to_owned())
            .or_default()
            .record(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_counts() {
        let m = MetricsRecorder::new();
        m.increment("a");
        m.increment("a");
        m.increment("b");
        assert_eq!(m.counter("a"), 2);
        assert_eq!(m.counter("b"), 1);
        assert_eq!(m.counter("missing"), 0);
        assert_eq!(
            m.counters(),
            vec![("a".to_owned(), 2), ("b".to_owned(), 1)]
        );
    }

    #[test]
    fn recorder_gauges_keep_last_value() {
        let m = MetricsRecorder::new();
        m.gauge("depth", 3.0);
        m.gauge("depth", 1.0);
        assert_eq!(m.gauge_value("depth"), Some(1.0));
        assert!(m.gauge_value("other").is_none());
    }

    #[test]
    fn recorder_aggregates_timing_samples() {
        let m = MetricsRecorder::new();
        m.timing("call", Duration::from_millis(7));
        m.timing("call", Duration::from_millis(5));
        m.timing("call", Duration::from_millis(9));

        let stats = m.timings("call");
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total, Duration::from_millis(21));
        assert_eq!(stats.min, Duration::from_millis(5));
        assert_eq!(stats.max, Duration::from_millis(9));
        assert_eq!(stats.mean(), Duration::from_millis(7));
        assert_eq!(m.timings("missing"), TimingStats::default());
        assert_eq!(m.timings("missing").mean(), Duration::ZERO);
    }

    #[test]
    fn timer_state_stays_bounded() {
        let m = MetricsRecorder::new();
        for i in 0..100_000u64 {
            m.timing("call", Duration::from_micros(i % 1000));
        }
        m.timing("other", Duration::from_secs(1));

        let stats = m.timings("call");
        assert_eq!(stats.count, 100_000);
        assert_eq!(stats.min, Duration::ZERO);
        assert_eq!(stats.max, Duration::from_micros(999));
        assert_eq!(m.all_timings().len(), 2);
        assert_eq!(m.inner.lock().timings.len(), 2);
    }

    #[test]
    fn noop_is_object_safe() {
        let sink: &dyn MetricsSink = &NoopMetrics;
        sink.increment("x");
        sink.gauge("y", 1.0);
        sink.timing("z", Duration::ZERO);
    }
}
