use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tollgate_core::{ItemRef, QueuedMessage, SinkAck, SourceItem, StreamName};
use tollgate_executor::{
    AdmissionQueue, CircuitBreakerRegistry, CooldownCoordinator, DeadLetterEntry,
    DeadLetterSink, DeliveryObserver, DeliveryQueue, DeliveryStats, ExecutorError,
};

use crate::cadence::{CadenceConfig, CycleStats};
use crate::dedup::{DedupConfig, DedupGate};
use crate::error::GatewayError;
use crate::metrics::PipelineMetrics;
use crate::scheduler::{BatchScheduler, StreamConfig, StreamOutcome, StreamStatus};

/// Per-stream summary of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub stream: StreamName,
    pub status: StreamStatus,
    pub items: u64,
    pub batches: u64,
    pub calls: u64,
    pub fallback_calls: u64,
    pub errors: u64,
    /// Items handed to the delivery queue.
    pub enqueued: u64,
    /// Items already delivered or still in flight from an earlier cycle.
    pub duplicates: u64,
}

impl From<&StreamOutcome> for StreamReport {
    fn from(outcome: &StreamOutcome) -> Self {
        Self {
            stream: outcome.stream.clone(),
            status: outcome.status,
            items: outcome.items.len() as u64,
            batches: outcome.batches,
            calls: outcome.calls,
            fallback_calls: outcome.fallback_calls,
            errors: outcome.errors,
            enqueued: 0,
            duplicates: 0,
        }
    }
}

/// Result of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub streams: Vec<StreamReport>,
    /// Totals fed to the cadence.
    pub stats: CycleStats,
    pub enqueued: u64,
    pub duplicates: u64,
    /// How long to wait before the next cycle.
    pub next_interval: Duration,
}

enum Admission {
    Enqueued,
    Duplicate,
    Failed,
}

/// Monitor loop tying the scheduler, the dedup gate and the delivery queue
/// together.
///
/// Build one with [`PipelineBuilder`](crate::PipelineBuilder). Each cycle
/// polls every stream, claims new items at the dedup gate and enqueues them
/// for delivery; the delivery queue runs independently and reports outcomes
/// back so the gate can record or release each claim.
pub struct Pipeline {
    pub(crate) streams: Vec<StreamConfig>,
    pub(crate) scheduler: BatchScheduler,
    pub(crate) admission: Arc<AdmissionQueue>,
    pub(crate) delivery: DeliveryQueue,
    pub(crate) dedup: Arc<DedupGate>,
    pub(crate) cooldown: Arc<CooldownCoordinator>,
    pub(crate) breakers: CircuitBreakerRegistry,
    pub(crate) cadence: CadenceConfig,
    pub(crate) dedup_config: DedupConfig,
    pub(crate) metrics: Arc<PipelineMetrics>,
    pub(crate) last_prune: Mutex<Option<Instant>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) started: AtomicBool,
}

impl Pipeline {
    /// Restore persisted cooldown and circuit state, then start both queue
    /// loops. Calling it again is a no-op.
    pub async fn start(&self) -> Result<(), GatewayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cooldown.load().await;
        self.breakers.load_all().await;
        self.admission.initialize()?;
        self.delivery.initialize()?;
        info!(
            streams = self.streams.len(),
            breakers = ?self.breakers.dependencies(),
            "pipeline started"
        );
        Ok(())
    }

    /// Poll every stream once and enqueue the new items.
    ///
    /// Never fails: source errors, deferrals and rejected items are counted
    /// in the report and left for the next cycle.
    #[instrument(skip_all, fields(cycle = self.metrics.snapshot().cycles + 1))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for stream in &self.streams {
            if self.shutdown.is_cancelled() {
                break;
            }
            let outcome = self.scheduler.poll_stream(stream).await;
            self.record_outcome(&outcome);

            let mut summary = StreamReport::from(&outcome);
            for item in outcome.items {
                match self.admit(stream, item).await {
                    Admission::Enqueued => summary.enqueued += 1,
                    Admission::Duplicate => summary.duplicates += 1,
                    Admission::Failed => {}
                }
            }

            report.stats.calls += summary.calls;
            report.stats.errors += summary.errors;
            report.stats.items += summary.items;
            report.enqueued += summary.enqueued;
            report.duplicates += summary.duplicates;
            report.streams.push(summary);
        }

        self.maybe_prune().await;
        self.metrics.increment_cycles();
        report.next_interval = self.cadence.next_interval(&report.stats);

        info!(
            calls = report.stats.calls,
            errors = report.stats.errors,
            items = report.stats.items,
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            next_interval_ms = report.next_interval.as_millis(),
            "cycle complete"
        );
        report
    }

    /// Run cycles until [`stop`](Self::stop) is called or the shutdown token
    /// is cancelled, sleeping the adaptive interval between cycles.
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.start().await?;
        while !self.shutdown.is_cancelled() {
            let report = self.run_cycle().await;
            if !self.sleep(report.next_interval).await {
                break;
            }
        }
        debug!("monitor loop exited");
        Ok(())
    }

    /// Run at most `cycles` cycles with the adaptive interval between them.
    pub async fn run_cycles(&self, cycles: usize) -> Result<Vec<CycleReport>, GatewayError> {
        self.start().await?;
        let mut reports = Vec::with_capacity(cycles);
        for n in 0..cycles {
            if self.shutdown.is_cancelled() {
                break;
            }
            let report = self.run_cycle().await;
            let interval = report.next_interval;
            reports.push(report);
            if n + 1 < cycles && !self.sleep(interval).await {
                break;
            }
        }
        Ok(reports)
    }

    /// Wait until every queued message has reached a delivery outcome.
    pub async fn wait_delivered(&self) {
        self.delivery.wait_idle().await;
    }

    /// Stop the monitor loop and both queues.
    ///
    /// Messages still queued for delivery are returned and their dedup
    /// claims released, so the next run picks the items up again.
    pub async fn stop(&self) -> Vec<QueuedMessage> {
        self.shutdown.cancel();
        self.delivery.stop().await;
        self.admission.stop().await;

        let abandoned = self.delivery.drain();
        for message in &abandoned {
            if let Some(item) = &message.item {
                self.dedup.release(&item.item_id, &item.scope_id);
            }
        }
        info!(abandoned = abandoned.len(), "pipeline stopped");
        abandoned
    }

    /// Token cancelled by [`stop`](Self::stop). Cancelling it directly ends
    /// [`run`](Self::run) after the current cycle without stopping the queues.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn streams(&self) -> &[StreamConfig] {
        &self.streams
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterSink> {
        self.delivery.dead_letters()
    }

    pub fn dedup(&self) -> &DedupGate {
        &self.dedup
    }

    pub fn cooldown(&self) -> &Arc<CooldownCoordinator> {
        &self.cooldown
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    fn record_outcome(&self, outcome: &StreamOutcome) {
        match outcome.status {
            StreamStatus::Completed => self.metrics.increment_streams_polled(),
            StreamStatus::Skipped => self.metrics.increment_streams_skipped(),
            StreamStatus::Deferred => self.metrics.increment_streams_deferred(),
        }
        self.metrics.add_batches(outcome.batches);
        self.metrics.add_fallback_calls(outcome.fallback_calls);
        self.metrics.add_source_errors(outcome.errors);
        self.metrics.add_items_found(outcome.items.len() as u64);
    }

    async fn admit(&self, stream: &StreamConfig, item: SourceItem) -> Admission {
        let item_id = item.id.clone();
        let scope = &stream.scope;

        match self.dedup.try_claim(&item_id, scope).await {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.increment_duplicates();
                return Admission::Duplicate;
            }
            Err(e) => {
                error!(%item_id, %scope, error = %e, "dedup lookup failed, skipping item");
                return Admission::Failed;
            }
        }

        let item = if stream.fetch_details {
            match self.scheduler.fetch_detail(&item_id, stream.priority).await {
                Ok(detailed) => detailed,
                Err(e) => {
                    warn!(%item_id, error = %e, "detail fetch failed, item left for next cycle");
                    self.dedup.release(&item_id, scope);
                    return Admission::Failed;
                }
            }
        } else {
            item
        };

        let message = QueuedMessage::new(item.payload, stream.destination.clone())
            .with_item(ItemRef::new(item_id.clone(), scope.clone()));
        match self.delivery.enqueue(message, stream.priority).await {
            Ok(message_id) => {
                debug!(%item_id, %message_id, "item enqueued");
                self.metrics.increment_enqueued();
                Admission::Enqueued
            }
            Err(e) => {
                if matches!(e, ExecutorError::QueueFull(_)) {
                    self.metrics.increment_dropped();
                }
                warn!(%item_id, error = %e, "enqueue rejected");
                self.dedup.release(&item_id, scope);
                Admission::Failed
            }
        }
    }

    async fn maybe_prune(&self) {
        let due = self
            .last_prune
            .lock()
            .is_none_or(|at| at.elapsed() >= self.dedup_config.prune_interval);
        if !due {
            return;
        }
        *self.last_prune.lock() = Some(Instant::now());
        if let Err(e) = self.dedup.prune(self.dedup_config.retention).await {
            warn!(error = %e, "dedup prune failed");
        }
    }

    /// Sleep for `duration`; `false` if shutdown was requested meanwhile.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("streams", &self.streams.len())
            .field("scheduler", &self.scheduler)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Feeds delivery outcomes back into the dedup gate.
pub(crate) struct PipelineObserver {
    pub(crate) dedup: Arc<DedupGate>,
    pub(crate) metrics: Arc<PipelineMetrics>,
}

#[async_trait]
impl DeliveryObserver for PipelineObserver {
    async fn on_delivered(&self, message: &QueuedMessage, _ack: &SinkAck) {
        self.metrics.increment_delivered();
        let Some(item) = &message.item else {
            return;
        };
        if let Err(e) = self.dedup.mark_seen(&item.item_id, &item.scope_id).await {
            // Releasing means a later cycle may deliver the item again.
            error!(item_id = %item.item_id, error = %e, "failed to record delivered item");
            self.dedup.release(&item.item_id, &item.scope_id);
        }
    }

    async fn on_dead_letter(&self, entry: &DeadLetterEntry) {
        self.metrics.increment_dead_lettered();
        if let Some(item) = &entry.message.item {
            self.dedup.release(&item.item_id, &item.scope_id);
        }
    }

    async fn on_dropped(&self, message: &QueuedMessage) {
        self.metrics.increment_dropped();
        if let Some(item) = &message.item {
            self.dedup.release(&item.item_id, &item.scope_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reports_default_to_completed() {
        let report = CycleReport::default();
        assert!(report.streams.is_empty());
        assert_eq!(report.next_interval, Duration::ZERO);

        let stream = StreamReport::default();
        assert!(stream.stream.is_empty());
        assert_eq!(stream.status, StreamStatus::Completed);
    }

    #[test]
    fn stream_report_copies_outcome_counters() {
        let mut outcome = StreamOutcome::new(&StreamName::new("tickets"));
        outcome.batches = 2;
        outcome.calls = 3;
        outcome.fallback_calls = 1;
        outcome.errors = 1;
        outcome.items.push(SourceItem::new(
            "T1",
            "alice",
            serde_json::json!({"title": "one"}),
        ));

        let report = StreamReport::from(&outcome);
        assert_eq!(report.stream.as_str(), "tickets");
        assert_eq!(report.items, 1);
        assert_eq!(report.batches, 2);
        assert_eq!(report.calls, 3);
        assert_eq!(report.fallback_calls, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.enqueued, 0);
    }
}
