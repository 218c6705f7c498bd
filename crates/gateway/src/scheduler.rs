//! Batch scheduling of source searches.
//!
//! Each stream's identities are split into fixed-size batches and searched
//! one batch at a time through the source's [`AdmissionQueue`], with every
//! call wrapped by the source [`CircuitBreaker`]. When the source does not
//! accept several identities in one call, the batch is retried one identity
//! at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use tollgate_core::{
    Batch, IdentityId, ItemId, MetricsSink, NoopMetrics, Priority, ScopeId, SearchCriteria,
    SourceItem, StreamName,
};
use tollgate_executor::{AdmissionQueue, CircuitBreaker, CooldownCoordinator, ExecutorError};
use tollgate_provider::{DynSourceClient, ErrorClass};

/// Split `identities` into consecutive batches of at most `batch_size`,
/// preserving order. A `batch_size` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use tollgate_core::IdentityId;
/// use tollgate_gateway::scheduler::partition;
///
/// let ids: Vec<IdentityId> = ["a", "b", "c"].into_iter().map(IdentityId::new).collect();
/// let batches = partition(&ids, 2);
/// assert_eq!(batches.len(), 2);
/// assert_eq!(batches[1].identities, vec![IdentityId::new("c")]);
/// ```
pub fn partition(identities: &[IdentityId], batch_size: usize) -> Vec<Batch> {
    identities
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch::new(index, chunk.to_vec()))
        .collect()
}

/// Configuration for the [`BatchScheduler`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Identities per search call.
    pub batch_size: usize,
    /// Default per-stream base delay; batches are spaced by half of it.
    pub base_delay: Duration,
    /// Lower clamp for the inter-batch delay.
    pub min_delay: Duration,
    /// Upper clamp for the inter-batch delay.
    pub max_delay: Duration,
    /// Spacing between per-identity fallback calls.
    pub fallback_delay: Duration,
    /// How far back before the last successful poll the next one starts.
    pub poll_overlap: Duration,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be >= 1".into());
        }
        if self.min_delay > self.max_delay {
            return Err(format!(
                "min_delay ({:?}) must not exceed max_delay ({:?})",
                self.min_delay, self.max_delay
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            base_delay: Duration::from_secs(2),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            fallback_delay: Duration::from_millis(250),
            poll_overlap: Duration::from_secs(60),
        }
    }
}

/// One logical polling stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub name: StreamName,
    /// Identities monitored by this stream, in polling order.
    pub identities: Vec<IdentityId>,
    /// Query parameters passed through to the source.
    pub params: serde_json::Value,
    /// Sink destination for items found by this stream.
    pub destination: String,
    /// Priority of both the stream's searches and its deliveries.
    pub priority: Priority,
    /// Deduplication scope. Defaults to the stream name.
    pub scope: ScopeId,
    /// Overrides [`SchedulerConfig::base_delay`].
    pub base_delay: Option<Duration>,
    /// Fetch each new item's full representation before delivery.
    pub fetch_details: bool,
}

impl StreamConfig {
    pub fn new(name: impl Into<StreamName>, destination: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            scope: ScopeId::new(name.as_str()),
            name,
            identities: Vec::new(),
            params: serde_json::Value::Null,
            destination: destination.into(),
            priority: Priority::NORMAL,
            base_delay: None,
            fetch_details: false,
        }
    }

    #[must_use]
    pub fn with_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<IdentityId>,
    {
        self.identities = identities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<ScopeId>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_fetch_details(mut self, enabled: bool) -> Self {
        self.fetch_details = enabled;
        self
    }
}

/// How a stream's poll ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamStatus {
    /// Every batch was attempted.
    #[default]
    Completed,
    /// A cooldown was active; nothing was called.
    Skipped,
    /// An open circuit or a cooldown stopped the stream part-way.
    Deferred,
}

/// Result of polling one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub stream: StreamName,
    pub status: StreamStatus,
    /// Items returned by every successful call, in call order.
    pub items: Vec<SourceItem>,
    /// Batches attempted.
    pub batches: u64,
    /// Source calls that reached a result (success or failure).
    pub calls: u64,
    /// Per-identity fallback calls among `calls`.
    pub fallback_calls: u64,
    /// Failed calls among `calls`.
    pub errors: u64,
}

impl StreamOutcome {
    pub(crate) fn new(stream: &StreamName) -> Self {
        Self {
            stream: stream.clone(),
            ..Self::default()
        }
    }
}

/// Polls streams batch by batch.
pub struct BatchScheduler {
    config: SchedulerConfig,
    source: Arc<dyn DynSourceClient>,
    admission: Arc<AdmissionQueue>,
    breaker: Arc<CircuitBreaker>,
    cooldown: Arc<CooldownCoordinator>,
    metrics: Arc<dyn MetricsSink>,
    last_poll: Mutex<HashMap<StreamName, DateTime<Utc>>>,
}

impl BatchScheduler {
    pub fn new(
        config: SchedulerConfig,
        source: Arc<dyn DynSourceClient>,
        admission: Arc<AdmissionQueue>,
        breaker: Arc<CircuitBreaker>,
        cooldown: Arc<CooldownCoordinator>,
    ) -> Self {
        Self {
            config,
            source,
            admission,
            breaker,
            cooldown,
            metrics: Arc::new(NoopMetrics),
            last_poll: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Delay between consecutive batches of `stream`: half its base delay,
    /// clamped to `[min_delay, max_delay]`.
    pub fn inter_batch_delay(&self, stream: &StreamConfig) -> Duration {
        let base = stream.base_delay.unwrap_or(self.config.base_delay);
        (base / 2).clamp(self.config.min_delay, self.config.max_delay)
    }

    /// Start of the last successful poll of `stream`, if any.
    pub fn last_poll(&self, stream: &StreamName) -> Option<DateTime<Utc>> {
        self.last_poll.lock().get(stream).copied()
    }

    /// Poll every batch of `stream` once.
    ///
    /// Never fails: errors are counted in the outcome and the scheduler moves
    /// on to the next batch. An open circuit or an active cooldown defers the
    /// rest of the stream to the next cycle.
    #[instrument(skip_all, fields(stream = %stream.name))]
    pub async fn poll_stream(&self, stream: &StreamConfig) -> StreamOutcome {
        let mut outcome = StreamOutcome::new(&stream.name);

        if self.cooldown.is_active() {
            info!(
                remaining_ms = %self.cooldown.remaining().as_millis(),
                "cooldown active, skipping stream"
            );
            self.metrics.increment("scheduler.skipped_streams");
            outcome.status = StreamStatus::Skipped;
            return outcome;
        }

        let started = Utc::now();
        let since = self.poll_window_start(&stream.name);
        let batches = if stream.identities.is_empty() {
            vec![Batch::new(0, Vec::new())]
        } else {
            partition(&stream.identities, self.config.batch_size)
        };
        let delay = self.inter_batch_delay(stream);
        debug!(batches = batches.len(), delay_ms = %delay.as_millis(), "polling stream");

        for batch in &batches {
            if batch.index > 0 {
                tokio::time::sleep(delay).await;
            }
            if self.cooldown.is_active() {
                outcome.status = StreamStatus::Deferred;
                break;
            }

            outcome.batches += 1;
            self.metrics.increment("scheduler.batches");
            let criteria = self.criteria(stream, batch.identities.clone(), since);

            match self.search(criteria, stream.priority).await {
                Ok(items) => {
                    outcome.calls += 1;
                    outcome.items.extend(items);
                }
                Err(err) if err.class() == Some(ErrorClass::Unsupported) && batch.len() > 1 => {
                    outcome.calls += 1;
                    info!(
                        batch = batch.index,
                        identities = batch.len(),
                        "batch search not supported, falling back to single identities"
                    );
                    if !self.fallback(stream, batch, since, &mut outcome).await {
                        outcome.status = StreamStatus::Deferred;
                        break;
                    }
                }
                Err(err) if self.defers(&err) => {
                    info!(batch = batch.index, error = %err, "deferring rest of stream");
                    outcome.status = StreamStatus::Deferred;
                    break;
                }
                Err(err) => {
                    outcome.calls += 1;
                    outcome.errors += 1;
                    warn!(batch = batch.index, error = %err, "batch search failed");
                }
            }
        }

        if outcome.status == StreamStatus::Completed && outcome.errors == 0 {
            self.last_poll.lock().insert(stream.name.clone(), started);
        }
        debug!(
            status = ?outcome.status,
            items = outcome.items.len(),
            calls = outcome.calls,
            errors = outcome.errors,
            "stream polled"
        );
        outcome
    }

    /// One call per identity of `batch`. Returns `false` if the stream must
    /// be deferred.
    async fn fallback(
        &self,
        stream: &StreamConfig,
        batch: &Batch,
        since: Option<DateTime<Utc>>,
        outcome: &mut StreamOutcome,
    ) -> bool {
        for (i, identity) in batch.identities.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.fallback_delay).await;
            }
            if self.cooldown.is_active() {
                return false;
            }

            let criteria = self.criteria(stream, vec![identity.clone()], since);
            let result = self.search(criteria, stream.priority).await;
            if let Err(err) = &result
                && self.defers(err)
            {
                return false;
            }

            outcome.calls += 1;
            outcome.fallback_calls += 1;
            self.metrics.increment("scheduler.fallback_calls");
            match result {
                Ok(items) => outcome.items.extend(items),
                Err(err) => {
                    outcome.errors += 1;
                    warn!(%identity, error = %err, "single-identity search failed");
                }
            }
        }
        true
    }

    fn defers(&self, err: &ExecutorError) -> bool {
        err.is_deferral() || matches!(err, ExecutorError::Stopped) || self.cooldown.is_active()
    }

    fn poll_window_start(&self, stream: &StreamName) -> Option<DateTime<Utc>> {
        let overlap = chrono::Duration::from_std(self.config.poll_overlap).ok()?;
        self.last_poll(stream).map(|last| last - overlap)
    }

    fn criteria(
        &self,
        stream: &StreamConfig,
        identities: Vec<IdentityId>,
        since: Option<DateTime<Utc>>,
    ) -> SearchCriteria {
        let criteria =
            SearchCriteria::new(stream.name.clone(), identities).with_params(stream.params.clone());
        match since {
            Some(since) => criteria.since(since),
            None => criteria,
        }
    }

    async fn search(
        &self,
        criteria: SearchCriteria,
        priority: Priority,
    ) -> Result<Vec<SourceItem>, ExecutorError> {
        let source = Arc::clone(&self.source);
        let breaker = Arc::clone(&self.breaker);
        self.admission
            .add(
                move || {
                    let source = Arc::clone(&source);
                    let breaker = Arc::clone(&breaker);
                    let criteria = criteria.clone();
                    async move { breaker.execute(source.search(&criteria)).await }
                },
                priority,
            )
            .await
    }

    /// Fetch one item's full representation through the same admission
    /// queue and breaker as searches.
    pub async fn fetch_detail(
        &self,
        id: &ItemId,
        priority: Priority,
    ) -> Result<SourceItem, ExecutorError> {
        let source = Arc::clone(&self.source);
        let breaker = Arc::clone(&self.breaker);
        let id = id.clone();
        self.admission
            .add(
                move || {
                    let source = Arc::clone(&source);
                    let breaker = Arc::clone(&breaker);
                    let id = id.clone();
                    async move { breaker.execute(source.fetch_detail(&id)).await }
                },
                priority,
            )
            .await
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;
    use tollgate_core::MetricsRecorder;
    use tollgate_executor::{
        AdmissionConfig, CircuitBreakerConfig, CooldownConfig, RetryStrategy,
    };
    use tollgate_provider::ProviderError;
    use tollgate_simulation::ScriptedSource;

    use super::*;

    struct Harness {
        scheduler: BatchScheduler,
        source: Arc<ScriptedSource>,
        cooldown: Arc<CooldownCoordinator>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsRecorder>,
    }

    fn harness(source: ScriptedSource, config: SchedulerConfig) -> Harness {
        let source = Arc::new(source);
        let metrics = Arc::new(MetricsRecorder::new());
        let cooldown = Arc::new(CooldownCoordinator::new(CooldownConfig::default()));
        let breaker = Arc::new(
            CircuitBreaker::new(
                "source",
                CircuitBreakerConfig {
                    failure_threshold: 2,
                    ..CircuitBreakerConfig::default()
                },
            )
            .with_cooldown(Arc::clone(&cooldown)),
        );
        let admission = Arc::new(
            AdmissionQueue::new(
                "source",
                AdmissionConfig {
                    rate_per_second: 100.0,
                    max_retries: 0,
                    retry_strategy: RetryStrategy::default(),
                    ..AdmissionConfig::default()
                },
            )
            .unwrap()
            .with_cooldown(Arc::clone(&cooldown)),
        );
        admission.initialize().unwrap();
        let scheduler = BatchScheduler::new(
            config,
            source.clone(),
            admission,
            Arc::clone(&breaker),
            Arc::clone(&cooldown),
        )
        .with_metrics(metrics.clone());
        Harness {
            scheduler,
            source,
            cooldown,
            breaker,
            metrics,
        }
    }

    fn stream(identities: &[&str]) -> StreamConfig {
        StreamConfig::new("rust", "chan").with_identities(identities.iter().copied())
    }

    #[test]
    fn partition_preserves_order() {
        let ids: Vec<IdentityId> = (0..7).map(|i| IdentityId::new(format!("u{i}"))).collect();
        let batches = partition(&ids, 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].index, 0);
        assert_eq!(batches[2].identities, vec![IdentityId::new("u6")]);
        let flat: Vec<_> = batches.into_iter().flat_map(|b| b.identities).collect();
        assert_eq!(flat, ids);
    }

    #[test]
    fn partition_edge_cases() {
        assert!(partition(&[], 5).is_empty());
        let ids = vec![IdentityId::new("a"), IdentityId::new("b")];
        assert_eq!(partition(&ids, 0).len(), 2);
        assert_eq!(partition(&ids, 10).len(), 1);
    }

    #[tokio::test]
    async fn inter_batch_delay_is_half_base_clamped() {
        let h = harness(ScriptedSource::new("src"), SchedulerConfig::default());
        let s = stream(&[]);
        assert_eq!(h.scheduler.inter_batch_delay(&s), Duration::from_secs(1));
        let slow = s.clone().with_base_delay(Duration::from_secs(60));
        assert_eq!(h.scheduler.inter_batch_delay(&slow), Duration::from_secs(10));
        let fast = s.with_base_delay(Duration::from_millis(10));
        assert_eq!(h.scheduler.inter_batch_delay(&fast), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_batches_and_collects_items() {
        let source = ScriptedSource::new("src")
            .with_item("a", "T1", serde_json::json!({"n": 1}))
            .with_item("d", "T2", serde_json::json!({"n": 2}));
        let h = harness(
            source,
            SchedulerConfig {
                batch_size: 2,
                ..SchedulerConfig::default()
            },
        );

        let start = Instant::now();
        let outcome = h.scheduler.poll_stream(&stream(&["a", "b", "c", "d"])).await;

        assert_eq!(outcome.status, StreamStatus::Completed);
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.items.len(), 2);
        // One inter-batch delay of base/2.
        assert!(start.elapsed() >= Duration::from_secs(1));
        let calls = h.source.searches();
        assert_eq!(calls[0].identities.len(), 2);
        assert_eq!(calls[1].identities[0].as_str(), "c");
        assert_eq!(h.metrics.counter("scheduler.batches"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_batch_falls_back_to_single_calls() {
        let source = ScriptedSource::new("src")
            .with_max_batch(1)
            .with_item("u1", "T1", serde_json::json!({}))
            .with_item("u3", "T3", serde_json::json!({}))
            .with_item("u5", "T5", serde_json::json!({}));
        let h = harness(source, SchedulerConfig::default());

        let outcome = h
            .scheduler
            .poll_stream(&stream(&["u1", "u2", "u3", "u4", "u5"]))
            .await;

        assert_eq!(outcome.status, StreamStatus::Completed);
        assert_eq!(outcome.fallback_calls, 5);
        assert_eq!(outcome.errors, 0);
        let mut ids: Vec<_> = outcome.items.iter().map(|i| i.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["T1", "T3", "T5"]);
        // One rejected batch call plus five single-identity calls.
        assert_eq!(h.source.searches().len(), 6);
        assert_eq!(h.metrics.counter("scheduler.fallback_calls"), 5);
        assert_eq!(h.breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn active_cooldown_skips_stream() {
        let h = harness(ScriptedSource::new("src"), SchedulerConfig::default());
        h.cooldown
            .note_throttled(Some(Duration::from_secs(30)), "test")
            .await;

        let outcome = h.scheduler.poll_stream(&stream(&["a"])).await;
        assert_eq!(outcome.status, StreamStatus::Skipped);
        assert!(h.source.searches().is_empty());
        assert_eq!(h.metrics.counter("scheduler.skipped_streams"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_defers_rest_of_stream() {
        let source = ScriptedSource::new("src").fail_next(ProviderError::Throttled {
            retry_after: Some(Duration::from_secs(30)),
        });
        let h = harness(
            source,
            SchedulerConfig {
                batch_size: 1,
                ..SchedulerConfig::default()
            },
        );

        let outcome = h.scheduler.poll_stream(&stream(&["a", "b", "c"])).await;
        assert_eq!(outcome.status, StreamStatus::Deferred);
        assert_eq!(h.source.searches().len(), 1);
        assert!(h.cooldown.is_active());
        assert!(h.scheduler.last_poll(&StreamName::new("rust")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_defers_and_errors_continue() {
        let source = ScriptedSource::new("src")
            .fail_next(ProviderError::Connection("reset".into()))
            .fail_next(ProviderError::Connection("reset".into()));
        let h = harness(
            source,
            SchedulerConfig {
                batch_size: 1,
                ..SchedulerConfig::default()
            },
        );

        let outcome = h
            .scheduler
            .poll_stream(&stream(&["a", "b", "c", "d"]))
            .await;
        // Two failures trip the breaker; the third batch is rejected locally.
        assert_eq!(outcome.errors, 2);
        assert_eq!(outcome.status, StreamStatus::Deferred);
        assert_eq!(h.source.searches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_poll_sets_overlapping_window() {
        let h = harness(ScriptedSource::new("src"), SchedulerConfig::default());
        let s = stream(&["a"]);

        h.scheduler.poll_stream(&s).await;
        let last = h.scheduler.last_poll(&s.name).unwrap();
        assert!(h.source.searches()[0].since.is_none());

        h.scheduler.poll_stream(&s).await;
        let since = h.source.searches()[1].since.unwrap();
        assert_eq!(since, last - chrono::Duration::seconds(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_without_identities_makes_one_call() {
        let h = harness(ScriptedSource::new("src"), SchedulerConfig::default());
        let outcome = h
            .scheduler
            .poll_stream(&StreamConfig::new("global", "chan"))
            .await;
        assert_eq!(outcome.calls, 1);
        assert!(h.source.searches()[0].identities.is_empty());
    }
}
