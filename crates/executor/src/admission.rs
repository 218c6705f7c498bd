use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tollgate_core::{MetricsSink, NoopMetrics, Priority};
use tollgate_provider::ProviderError;

use crate::config::{AdmissionConfig, validate_rate};
use crate::cooldown::CooldownCoordinator;
use crate::error::ExecutorError;
use crate::ready_queue::{ReadyQueue, Slot, deadline_after};

/// Where a task is in its retry life cycle.
///
/// `Admitted -> Executing -> {Succeeded, Retrying, Failed}`; a retrying task
/// goes back to `Executing` once its backoff has passed. The attempt counter
/// is bounded by `max_retries`.
#[derive(Debug, Clone)]
pub enum TaskPhase {
    Admitted,
    Executing { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded,
    Failed(ExecutorError),
}

impl TaskPhase {
    /// Phase after attempt number `attempt` (zero-based) finished with `result`.
    pub fn after_attempt(
        attempt: u32,
        result: Result<(), ExecutorError>,
        config: &AdmissionConfig,
    ) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let backoff = config.retry_strategy.delay_for(attempt);
                let hint = err
                    .provider_error()
                    .and_then(ProviderError::retry_after)
                    .unwrap_or_default()
                    .min(config.max_retry_after);
                Self::Retrying {
                    attempt: attempt + 1,
                    delay: backoff.max(hint),
                }
            }
            Err(ExecutorError::Provider(last)) if last.is_retryable() => {
                Self::Failed(ExecutorError::Exhausted {
                    attempts: attempt + 1,
                    last,
                })
            }
            Err(err) => Self::Failed(err),
        }
    }
}

/// A type-erased unit of work.
trait Task: Send {
    /// Run the operation once. On success the result is handed to the caller.
    fn attempt(&mut self) -> BoxFuture<'_, Result<(), ExecutorError>>;

    /// Hand the final error to the caller.
    fn fail(self: Box<Self>, err: ExecutorError);

    /// The caller stopped waiting for the result.
    fn is_abandoned(&self) -> bool;
}

struct Operation<F, T> {
    op: F,
    reply: Option<oneshot::Sender<Result<T, ExecutorError>>>,
}

impl<F, Fut, T> Task for Operation<F, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, ExecutorError>> + Send + 'static,
    T: Send,
{
    fn attempt(&mut self) -> BoxFuture<'_, Result<(), ExecutorError>> {
        let call = (self.op)();
        Box::pin(async move {
            let value = call.await?;
            if let Some(reply) = self.reply.take() {
                let _ = reply.send(Ok(value));
            }
            Ok(())
        })
    }

    fn fail(mut self: Box<Self>, err: ExecutorError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(err));
        }
    }

    fn is_abandoned(&self) -> bool {
        self.reply.as_ref().is_none_or(oneshot::Sender::is_closed)
    }
}

struct Job {
    task: Box<dyn Task>,
    attempt: u32,
    phase: TaskPhase,
}

/// Spacing between dispatches at `rate` per second.
fn dispatch_interval(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX)
}

/// State shared between callers and the consumer loop.
struct Shared {
    queue: Mutex<ReadyQueue<Job>>,
    notify: Notify,
    rate: Mutex<f64>,
}

impl Shared {
    fn interval(&self) -> Duration {
        dispatch_interval(*self.rate.lock())
    }

    fn fail_pending(&self, err: &ExecutorError) -> usize {
        let drained = self.queue.lock().drain();
        let count = drained.len();
        for slot in drained {
            slot.item.task.fail(err.clone());
        }
        count
    }
}

/// Token-bucket call throttle with priorities and local retries.
///
/// A single consumer loop dispatches at most one operation at a time, spaced
/// at least `1 / rate` apart, highest priority first (ties by arrival). Each
/// dispatch waits out an active cooldown first. Retryable failures are
/// requeued with backoff and are invisible to the caller until retries run
/// out.
pub struct AdmissionQueue {
    name: String,
    config: AdmissionConfig,
    shared: Arc<Shared>,
    cooldown: Option<Arc<CooldownCoordinator>>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AdmissionQueue {
    /// Create a queue. [`initialize`](Self::initialize) must be called
    /// before any work is added.
    pub fn new(name: impl Into<String>, config: AdmissionConfig) -> Result<Self, ExecutorError> {
        config.validate().map_err(ExecutorError::Config)?;
        Ok(Self {
            name: name.into(),
            shared: Arc::new(Shared {
                queue: Mutex::new(ReadyQueue::new()),
                notify: Notify::new(),
                rate: Mutex::new(config.rate_per_second),
            }),
            config,
            cooldown: None,
            metrics: Arc::new(NoopMetrics),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Wait out `cooldown` before every dispatch.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Arc<CooldownCoordinator>) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the consumer loop. Calling it again is a no-op.
    pub fn initialize(&self) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Stopped);
        }
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let consumer = Consumer {
            name: self.name.clone(),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            cooldown: self.cooldown.clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
        };
        *handle = Some(tokio::spawn(consumer.run()));
        info!(queue = %self.name, rate = *self.shared.rate.lock(), "admission queue started");
        Ok(())
    }

    /// Change the dispatch rate. Takes effect from the next dispatch.
    pub fn set_rate(&self, rate_per_second: f64) -> Result<(), ExecutorError> {
        validate_rate(rate_per_second).map_err(ExecutorError::Config)?;
        *self.shared.rate.lock() = rate_per_second;
        info!(queue = %self.name, rate = rate_per_second, "admission rate changed");
        Ok(())
    }

    pub fn rate(&self) -> f64 {
        *self.shared.rate.lock()
    }

    /// Enqueue `operation` and wait for its final outcome.
    ///
    /// `operation` is called once per attempt. The caller sees either the
    /// first successful result or the final error after retries run out.
    #[instrument(skip_all, fields(queue = %self.name, %priority))]
    pub async fn add<F, Fut, T>(&self, operation: F, priority: Priority) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ExecutorError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Stopped);
        }
        if self.handle.lock().is_none() {
            return Err(ExecutorError::NotInitialized);
        }

        let (tx, rx) = oneshot::channel();
        let pending = {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.config.max_pending {
                return Err(ExecutorError::QueueFull(self.config.max_pending));
            }
            let job = Job {
                task: Box::new(Operation {
                    op: operation,
                    reply: Some(tx),
                }),
                attempt: 0,
                phase: TaskPhase::Admitted,
            };
            queue.push(priority, Instant::now(), job);
            queue.len()
        };
        self.metrics.increment("admission.admitted");
        #[allow(clippy::cast_precision_loss)]
        self.metrics.gauge("admission.pending", pending as f64);
        self.shared.notify.notify_one();

        let outcome = match self.config.admission_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(queue = %self.name, timeout = ?limit, "admission timed out");
                    return Err(ExecutorError::AdmissionTimeout(limit));
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or(Err(ExecutorError::Stopped))
    }

    /// Tasks waiting for dispatch (including ones in retry backoff).
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether dispatch is currently held back by a cooldown.
    pub fn is_paused(&self) -> bool {
        self.cooldown.as_ref().is_some_and(|c| c.is_active())
    }

    /// Stop the consumer loop.
    ///
    /// The operation in flight (if any) runs to completion; no new one is
    /// started. Callers still waiting receive [`ExecutorError::Stopped`].
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(queue = %self.name, error = %e, "admission loop ended abnormally");
        }
        let failed = self.shared.fail_pending(&ExecutorError::Stopped);
        info!(queue = %self.name, dropped = failed, "admission queue stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("name", &self.name)
            .field("rate", &self.rate())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// The single consumer loop.
struct Consumer {
    name: String,
    config: AdmissionConfig,
    shared: Arc<Shared>,
    cooldown: Option<Arc<CooldownCoordinator>>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl Consumer {
    async fn run(self) {
        let mut last_dispatch: Option<Instant> = None;

        loop {
            if !self.wait_ready().await {
                break;
            }

            if let Some(last) = last_dispatch {
                let wait = self.shared.interval().saturating_sub(last.elapsed());
                if !wait.is_zero() && !self.pause(wait).await {
                    break;
                }
            }

            if let Some(cooldown) = &self.cooldown
                && cooldown.is_active()
            {
                info!(
                    queue = %self.name,
                    remaining_ms = %cooldown.remaining().as_millis(),
                    "admission paused for cooldown"
                );
                let waited = tokio::select! {
                    () = self.cancel.cancelled() => false,
                    () = cooldown.wait() => true,
                };
                if !waited {
                    break;
                }
            }

            let Some(slot) = self.shared.queue.lock().pop_ready(Instant::now()) else {
                continue;
            };
            if slot.item.task.is_abandoned() {
                debug!(queue = %self.name, "skipping task abandoned by its caller");
                continue;
            }

            last_dispatch = Some(Instant::now());
            self.dispatch(slot).await;
        }

        self.shared.fail_pending(&ExecutorError::Stopped);
    }

    /// Wait until some task is eligible. Returns `false` when stopped.
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

    async fn dispatch(&self, mut slot: Slot<Job>) {
        let attempt = slot.item.attempt;
        debug!(queue = %self.name, attempt, from = ?slot.item.phase, "dispatching task");
        slot.item.phase = TaskPhase::Executing { attempt };

        let result = tokio::time::timeout(self.config.attempt_timeout, slot.item.task.attempt())
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout(self.config.attempt_timeout).into())
            });

        match TaskPhase::after_attempt(attempt, result, &self.config) {
            TaskPhase::Succeeded => {
                self.metrics.increment("admission.processed");
            }
            TaskPhase::Retrying { attempt, delay } => {
                warn!(
                    queue = %self.name,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    "retryable error, will retry"
                );
                self.metrics.increment("admission.retried");
                slot.item.attempt = attempt;
                slot.item.phase = TaskPhase::Retrying { attempt, delay };
                slot.ready_at = deadline_after(delay);
                self.shared.queue.lock().requeue(slot);
            }
            TaskPhase::Failed(err) => {
                warn!(
                    queue = %self.name,
                    attempt,
                    error = %err,
                    "task failed"
                );
                self.metrics.increment("admission.failed");
                slot.item.task.fail(err);
            }
            TaskPhase::Admitted | TaskPhase::Executing { .. } => {}
        }
    }
}
