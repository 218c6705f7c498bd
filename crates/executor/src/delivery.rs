use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tollgate_core::{MessageId, MetricsSink, NoopMetrics, Priority, QueuedMessage, SinkAck};
use tollgate_provider::{DynSinkClient, ErrorClass, ProviderError};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::DeliveryConfig;
use crate::cooldown::CooldownCoordinator;
use crate::dlq::{DeadLetterEntry, DeadLetterQueue, DeadLetterSink};
use crate::error::ExecutorError;
use crate::rate_window::RateWindow;
use crate::ready_queue::{ReadyQueue, Slot, deadline_after};

/// Notified about the final outcome of each message.
#[async_trait]
pub trait DeliveryObserver: Send + Sync {
    /// The sink acknowledged the message.
    async fn on_delivered(&self, message: &QueuedMessage, ack: &SinkAck);

    /// The message was abandoned and handed to the dead-letter sink.
    async fn on_dead_letter(&self, entry: &DeadLetterEntry);

    /// The message was evicted to make room for a higher-ranked one.
    async fn on_dropped(&self, _message: &QueuedMessage) {}
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    throttled: AtomicU64,
    deferred: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub retried: u64,
    pub throttled: u64,
    pub deferred: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub queued: u64,
}

struct Shared {
    queue: Mutex<ReadyQueue<QueuedMessage>>,
    notify: Notify,
    idle: Notify,
    in_flight: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.is_empty() && !self.in_flight.load(Ordering::SeqCst)
    }
}

/// Priority queue in front of a rate-limited sink.
///
/// A single consumer loop sends at most one message at a time, highest
/// priority first (ties by arrival), never more than `max_per_window` per
/// window. Every attempt goes through the sink's [`CircuitBreaker`] and waits
/// out an active cooldown first.
///
/// | Outcome | Effect |
/// |---------|--------|
/// | acknowledged | observer `on_delivered` |
/// | circuit open | requeued until the breaker admits a trial call, `retry_count` unchanged |
/// | throttled | requeued after the retry-after hint, `retry_count + 1` |
/// | transient error | requeued with backoff until `max_retries`, then dead-lettered |
/// | permanent / unsupported | dead-lettered at once |
pub struct DeliveryQueue {
    config: DeliveryConfig,
    shared: Arc<Shared>,
    sink: Arc<dyn DynSinkClient>,
    breaker: Arc<CircuitBreaker>,
    cooldown: Option<Arc<CooldownCoordinator>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    observer: Option<Arc<dyn DeliveryObserver>>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
    pub fn new(
        config: DeliveryConfig,
        sink: Arc<dyn DynSinkClient>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ExecutorError> {
        config.validate().map_err(ExecutorError::Config)?;
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(ReadyQueue::new()),
                notify: Notify::new(),
                idle: Notify::new(),
                in_flight: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            sink,
            breaker,
            cooldown: None,
            dead_letters: Arc::new(DeadLetterQueue::new()),
            observer: None,
            metrics: Arc::new(NoopMetrics),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Arc<CooldownCoordinator>) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Replace the default in-memory dead-letter queue.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the consumer loop. Calling it again is a no-op.
    ///
    /// Messages enqueued before this call wait in the queue.
    pub fn initialize(&self) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Stopped);
        }
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let consumer = Consumer {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            sink: Arc::clone(&self.sink),
            breaker: Arc::clone(&self.breaker),
            cooldown: self.cooldown.clone(),
            dead_letters: Arc::clone(&self.dead_letters),
            observer: self.observer.clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
        };
        *handle = Some(tokio::spawn(consumer.run()));
        info!(
            sink = %self.sink.name(),
            max_per_window = self.config.max_per_window,
            window_ms = %self.config.window.as_millis(),
            "delivery queue started"
        );
        Ok(())
    }

    /// Queue `message` for delivery.
    ///
    /// At capacity the lowest-priority oldest message is evicted; if
    /// `message` itself ranks lowest it is rejected with
    /// [`ExecutorError::QueueFull`] instead.
    #[instrument(skip_all, fields(message_id = %message.id, %priority))]
    pub async fn enqueue(
        &self,
        mut message: QueuedMessage,
        priority: Priority,
    ) -> Result<MessageId, ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Stopped);
        }
        message.priority = priority;
        let id = message.id.clone();

        let evicted = {
            let mut queue = self.shared.queue.lock();
            let evicted = if queue.len() >= self.config.max_queue_size {
                queue.evict_lowest(priority).map(|victim| victim.item)
            } else {
                None
            };
            if queue.len() >= self.config.max_queue_size {
                drop(queue);
                self.record_drop();
                warn!(message_id = %id, "delivery queue full, rejecting message");
                return Err(ExecutorError::QueueFull(self.config.max_queue_size));
            }
            queue.push(priority, Instant::now(), message);
            evicted
        };

        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment("delivery.enqueued");
        self.shared.notify.notify_one();

        if let Some(victim) = evicted {
            self.record_drop();
            warn!(
                message_id = %victim.id,
                priority = %victim.priority,
                "delivery queue full, dropped lowest-priority message"
            );
            if let Some(observer) = &self.observer {
                observer.on_dropped(&victim).await;
            }
        }
        Ok(id)
    }

    fn record_drop(&self) {
        self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment("delivery.dropped");
    }

    /// Messages waiting for delivery (including ones in backoff).
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every queued message without delivering it, highest priority
    /// first.
    pub fn drain(&self) -> Vec<QueuedMessage> {
        let drained: Vec<_> = self
            .shared
            .queue
            .lock()
            .drain()
            .into_iter()
            .map(|slot| slot.item)
            .collect();
        self.shared.idle.notify_waiters();
        drained
    }

    /// Wait until the queue is empty and no delivery is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.is_idle() {
                return;
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        let c = &self.shared.counters;
        DeliveryStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            queued: self.len() as u64,
        }
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterSink> {
        &self.dead_letters
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Stop the consumer loop.
    ///
    /// A delivery in flight completes; queued messages stay queued and can
    /// be taken with [`drain`](Self::drain).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(sink = %self.sink.name(), error = %e, "delivery loop ended abnormally");
        }
        info!(sink = %self.sink.name(), queued = self.len(), "delivery queue stopped");
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("sink", &self.sink.name())
            .field("config", &self.config)
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

struct Consumer {
    config: DeliveryConfig,
    shared: Arc<Shared>,
    sink: Arc<dyn DynSinkClient>,
    breaker: Arc<CircuitBreaker>,
    cooldown: Option<Arc<CooldownCoordinator>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    observer: Option<Arc<dyn DeliveryObserver>>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl Consumer {
    async fn run(self) {
        let mut window = RateWindow::new(self.config.max_per_window, self.config.window);

        loop {
            if !self.wait_ready().await {
                break;
            }

            if let Some(wait) = window.wait_time(Instant::now()) {
                debug!(
                    sink = %self.sink.name(),
                    sent = window.count(),
                    wait_ms = %wait.as_millis(),
                    "rate window exhausted"
                );
                if !self.pause(wait).await {
                    break;
                }
                continue;
            }

            if let Some(cooldown) = &self.cooldown
                && cooldown.is_active()
            {
                info!(
                    sink = %self.sink.name(),
                    remaining_ms = %cooldown.remaining().as_millis(),
                    "delivery paused for cooldown"
                );
                let waited = tokio::select! {
                    () = self.cancel.cancelled() => false,
                    () = cooldown.wait() => true,
                };
                if !waited {
                    break;
                }
            }

            let slot = {
                let mut queue = self.shared.queue.lock();
                let slot = queue.pop_ready(Instant::now());
                if slot.is_some() {
                    self.shared.in_flight.store(true, Ordering::SeqCst);
                }
                slot
            };
            let Some(slot) = slot else {
                continue;
            };

            window.try_acquire(Instant::now());
            self.attempt(slot).await;
            self.shared.in_flight.store(false, Ordering::SeqCst);
            self.shared.idle.notify_waiters();
        }
    }

    /// Wait until some message is eligible. Returns `false` when stopped.
    async fn wait_ready(&self) -> bool {
        loop {
            let notified = self.shared.notify.notified();
            let next_at = {
                let queue = self.shared.queue.lock();
                if queue.has_ready(Instant::now()) {
                    return true;
                }
                queue.next_ready_at()
            };
            let timer = async {
                match next_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = notified => {}
                () = timer => {}
            }
        }
    }

    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn attempt(&self, mut slot: Slot<QueuedMessage>) {
        slot.item.mark_attempt(Utc::now());
        let started = Instant::now();
        let result = {
            let message = &slot.item;
            self.breaker
                .execute(self.sink.deliver(&message.payload, &message.destination))
                .await
        };
        self.metrics.timing("delivery.attempt", started.elapsed());

        match result {
            Ok(ack) => {
                self.shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("delivery.delivered");
                info!(
                    message_id = %slot.item.id,
                    destination = %slot.item.destination,
                    retries = slot.item.retry_count,
                    "message delivered"
                );
                if let Some(observer) = &self.observer {
                    observer.on_delivered(&slot.item, &ack).await;
                }
            }
            Err(
                err @ (ExecutorError::CircuitOpen { retry_in, .. }
                | ExecutorError::CooldownActive {
                    remaining: retry_in,
                }),
            ) => {
                self.shared.counters.deferred.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("delivery.deferred");
                debug!(
                    message_id = %slot.item.id,
                    retry_in_ms = %retry_in.as_millis(),
                    reason = err.code(),
                    "sink call held back, deferring message"
                );
                self.requeue(slot, retry_in);
            }
            Err(err) => self.handle_failure(slot, err).await,
        }
    }

    async fn handle_failure(&self, mut slot: Slot<QueuedMessage>, err: ExecutorError) {
        let attempts = slot.item.retry_count + 1;
        match err.class() {
            Some(ErrorClass::Throttled) if slot.item.retry_count < self.config.max_retries => {
                let delay = self.throttle_delay(&err, slot.item.retry_count);
                slot.item.retry_count += 1;
                self.shared.counters.throttled.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("delivery.throttled");
                warn!(
                    message_id = %slot.item.id,
                    delay_ms = %delay.as_millis(),
                    "sink throttled delivery"
                );
                self.requeue(slot, delay);
            }
            Some(ErrorClass::Transient) if slot.item.retry_count < self.config.max_retries => {
                let delay = self.config.retry_strategy.delay_for(slot.item.retry_count);
                slot.item.retry_count += 1;
                self.shared.counters.retried.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment("delivery.retried");
                warn!(
                    message_id = %slot.item.id,
                    attempt = attempts,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "delivery failed, will retry"
                );
                self.requeue(slot, delay);
            }
            Some(ErrorClass::Throttled | ErrorClass::Transient) => {
                let last = match err {
                    ExecutorError::Provider(last) => last,
                    other => ProviderError::Unavailable(other.to_string()),
                };
                let exhausted = ExecutorError::Exhausted { attempts, last };
                self.dead_letter(slot.item, &exhausted, attempts).await;
            }
            _ => self.dead_letter(slot.item, &err, attempts).await,
        }
    }

    /// Retry-after hint, else whatever is left of the cooldown, else backoff.
    fn throttle_delay(&self, err: &ExecutorError, retry_count: u32) -> Duration {
        if let Some(hint) = err.provider_error().and_then(ProviderError::retry_after) {
            return hint.min(self.config.max_retry_after);
        }
        let remaining = self
            .cooldown
            .as_ref()
            .map_or(Duration::ZERO, |c| c.remaining());
        if remaining.is_zero() {
            self.config.retry_strategy.delay_for(retry_count)
        } else {
            remaining
        }
    }

    fn requeue(&self, mut slot: Slot<QueuedMessage>, delay: Duration) {
        slot.ready_at = deadline_after(delay);
        slot.item.next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        self.shared.queue.lock().requeue(slot);
    }

    async fn dead_letter(&self, message: QueuedMessage, err: &ExecutorError, attempts: u32) {
        error!(
            message_id = %message.id,
            destination = %message.destination,
            attempts,
            error = %err,
            "delivery abandoned, dead-lettering message"
        );
        self.shared
            .counters
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
        self.metrics.increment("delivery.dead_lettered");

        let entry = DeadLetterEntry::new(message, err.code(), err.to_string(), attempts);
        if let Some(observer) = &self.observer {
            observer.on_dead_letter(&entry).await;
        }
        self.dead_letters.push(entry).await;
    }
}
