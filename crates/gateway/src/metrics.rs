use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking pipeline outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Monitor cycles completed.
    pub cycles: AtomicU64,
    /// Streams polled to completion.
    pub streams_polled: AtomicU64,
    /// Streams skipped because a cooldown was active.
    pub streams_skipped: AtomicU64,
    /// Streams cut short by an open circuit or a cooldown.
    pub streams_deferred: AtomicU64,
    /// Batch search calls made.
    pub batches: AtomicU64,
    /// Per-identity calls made after a batch was not supported.
    pub fallback_calls: AtomicU64,
    /// Source calls that failed.
    pub source_errors: AtomicU64,
    /// Items returned by the source.
    pub items_found: AtomicU64,
    /// Items dropped because they were already seen or in flight.
    pub duplicates: AtomicU64,
    /// Messages handed to the delivery queue.
    pub enqueued: AtomicU64,
    /// Messages acknowledged by the sink.
    pub delivered: AtomicU64,
    /// Messages dead-lettered.
    pub dead_lettered: AtomicU64,
    /// Messages evicted from, or rejected by, a full delivery queue.
    pub dropped: AtomicU64,
}

impl PipelineMetrics {
    pub fn increment_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streams_polled(&self) {
        self.streams_polled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streams_skipped(&self) {
        self.streams_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streams_deferred(&self) {
        self.streams_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batches(&self, n: u64) {
        self.batches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fallback_calls(&self, n: u64) {
        self.fallback_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_source_errors(&self, n: u64) {
        self.source_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_items_found(&self, n: u64) {
        self.items_found.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            streams_polled: self.streams_polled.load(Ordering::Relaxed),
            streams_skipped: self.streams_skipped.load(Ordering::Relaxed),
            streams_deferred: self.streams_deferred.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            items_found: self.items_found.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub streams_polled: u64,
    pub streams_skipped: u64,
    pub streams_deferred: u64,
    pub batches: u64,
    pub fallback_calls: u64,
    pub source_errors: u64,
    pub items_found: u64,
    pub duplicates: u64,
    pub enqueued: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = PipelineMetrics::default();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = PipelineMetrics::default();
        m.increment_cycles();
        m.increment_cycles();
        m.increment_streams_polled();
        m.increment_streams_skipped();
        m.increment_streams_deferred();
        m.add_batches(3);
        m.add_fallback_calls(5);
        m.add_source_errors(1);
        m.add_items_found(7);
        m.increment_duplicates();
        m.increment_enqueued();
        m.increment_delivered();
        m.increment_dead_lettered();
        m.increment_dropped();

        let snap = m.snapshot();
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.streams_polled, 1);
        assert_eq!(snap.streams_skipped, 1);
        assert_eq!(snap.streams_deferred, 1);
        assert_eq!(snap.batches, 3);
        assert_eq!(snap.fallback_calls, 5);
        assert_eq!(snap.source_errors, 1);
        assert_eq!(snap.items_found, 7);
        assert_eq!(snap.duplicates, 1);
        assert_eq!(snap.enqueued, 1);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.dead_lettered, 1);
        assert_eq!(snap.dropped, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let m = PipelineMetrics::default();
        m.increment_delivered();
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["delivered"], 1);
    }
}
