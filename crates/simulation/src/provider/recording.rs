//! Recording sink that captures every delivery attempt for verification.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tollgate_core::SinkAck;
use tollgate_provider::{ProviderError, SinkClient};

/// A sink that records all delivery attempts.
///
/// Failures come from two places: one-shot errors queued with
/// [`fail_next`](Self::fail_next), consumed first, and the standing
/// [`FailureMode`], which returns [`failure_error`](Self::with_failure_error)
/// on the calls it selects.
pub struct RecordingSink {
    name: String,
    calls: Mutex<Vec<CapturedDelivery>>,
    call_count: AtomicUsize,
    delay: Option<Duration>,
    failure_mode: FailureMode,
    failure_error: ProviderError,
    script: Mutex<VecDeque<ProviderError>>,
}

/// One delivery attempt seen by the sink.
#[derive(Debug, Clone)]
pub struct CapturedDelivery {
    /// Wall-clock time of the attempt.
    pub timestamp: DateTime<Utc>,
    /// Runtime clock reading, usable under a paused test clock.
    pub at: Instant,
    pub payload: serde_json::Value,
    pub destination: String,
    /// Receipt on success, rendered error otherwise.
    pub result: Result<String, String>,
}

impl CapturedDelivery {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Mode for simulating failures.
#[derive(Debug, Clone, Default)]
pub enum FailureMode {
    /// Never fail.
    #[default]
    None,
    /// Fail every N calls.
    EveryN(usize),
    /// Fail with probability p (0.0 to 1.0).
    Probabilistic(f64),
    /// Fail the first N calls.
    FirstN(usize),
    /// Always fail.
    Always,
}

impl RecordingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            delay: None,
            failure_mode: FailureMode::None,
            failure_error: ProviderError::Unavailable("simulated failure".into()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Set a delay before responding.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Error returned when the failure mode selects a call.
    #[must_use]
    pub fn with_failure_error(mut self, error: ProviderError) -> Self {
        self.failure_error = error;
        self
    }

    /// Queue a one-shot failure for the next call.
    #[must_use]
    pub fn fail_next(self, error: ProviderError) -> Self {
        self.push_failure(error);
        self
    }

    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().push_back(error);
    }

    /// All attempts, successful or not.
    pub fn calls(&self) -> Vec<CapturedDelivery> {
        self.calls.lock().clone()
    }

    /// Successful deliveries only.
    pub fn deliveries(&self) -> Vec<CapturedDelivery> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded())
            .cloned()
            .collect()
    }

    /// Payloads of successful deliveries, in delivery order.
    pub fn delivered_payloads(&self) -> Vec<serde_json::Value> {
        self.deliveries().into_iter().map(|c| c.payload).collect()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// Assert that the sink was called exactly N times.
    ///
    /// # Panics
    ///
    /// Panics if the sink was not called exactly N times.
    pub fn assert_called(&self, n: usize) {
        let count = self.call_count();
        assert_eq!(
            count, n,
            "expected {n} calls to sink '{}', got {count}",
            self.name
        );
    }

    /// Assert that exactly N deliveries succeeded.
    ///
    /// # Panics
    ///
    /// Panics if the number of successful deliveries differs.
    pub fn assert_delivered(&self, n: usize) {
        let delivered = self.deliveries().len();
        assert_eq!(
            delivered, n,
            "expected {n} deliveries to sink '{}', got {delivered}",
            self.name
        );
    }

    /// Assert that the sink was not called.
    ///
    /// # Panics
    ///
    /// Panics if the sink was called.
    pub fn assert_not_called(&self) {
        self.assert_called(0);
    }

    fn should_fail(&self, call_number: usize) -> bool {
        match &self.failure_mode {
            FailureMode::None => false,
            FailureMode::EveryN(n) => *n > 0 && call_number.is_multiple_of(*n),
            FailureMode::Probabilistic(p) => rand::random::<f64>() < *p,
            FailureMode::FirstN(n) => call_number <= *n,
            FailureMode::Always => true,
        }
    }
}

impl SinkClient for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
    ) -> Result<SinkAck, ProviderError> {
        let call_number = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let at = Instant::now();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        let result = match scripted {
            Some(err) => Err(err),
            None if self.should_fail(call_number) => Err(self.failure_error.clone()),
            None => Ok(SinkAck::receipt(format!("{}-{call_number}", self.name))),
        };

        self.calls.lock().push(CapturedDelivery {
            timestamp: Utc::now(),
            at,
            payload: payload.clone(),
            destination: destination.to_owned(),
            result: match &result {
                Ok(ack) => Ok(ack.receipt.clone().unwrap_or_default()),
                Err(e) => Err(e.to_string()),
            },
        });

        result
    }
}

impl std::fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSink")
            .field("name", &self.name)
            .field("call_count", &self.call_count())
            .field("delay", &self.delay)
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u32) -> serde_json::Value {
        serde_json::json!({ "n": n })
    }

    #[tokio::test]
    async fn records_deliveries() {
        let sink = RecordingSink::new("test");

        let ack = sink.deliver(&payload(1), "inbox").await.unwrap();
        assert_eq!(ack.receipt.as_deref(), Some("test-1"));
        sink.deliver(&payload(2), "inbox").await.unwrap();

        sink.assert_called(2);
        sink.assert_delivered(2);
        assert_eq!(sink.delivered_payloads(), vec![payload(1), payload(2)]);
        assert_eq!(sink.calls()[0].destination, "inbox");
    }

    #[tokio::test]
    async fn clear_resets_state() {
        let sink = RecordingSink::new("test");
        sink.deliver(&payload(1), "inbox").await.unwrap();
        sink.clear();
        sink.assert_not_called();
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let sink = RecordingSink::new("test")
            .fail_next(ProviderError::Throttled {
                retry_after: Some(Duration::from_secs(3)),
            })
            .fail_next(ProviderError::Rejected("bad".into()));

        let err = sink.deliver(&payload(1), "inbox").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(matches!(
            sink.deliver(&payload(1), "inbox").await,
            Err(ProviderError::Rejected(_))
        ));
        assert!(sink.deliver(&payload(1), "inbox").await.is_ok());

        sink.assert_called(3);
        sink.assert_delivered(1);
        assert!(!sink.calls()[0].succeeded());
    }

    #[tokio::test]
    async fn failure_mode_first_n() {
        let sink = RecordingSink::new("test").with_failure_mode(FailureMode::FirstN(2));
        assert!(sink.deliver(&payload(1), "inbox").await.is_err());
        assert!(sink.deliver(&payload(1), "inbox").await.is_err());
        assert!(sink.deliver(&payload(1), "inbox").await.is_ok());
    }

    #[tokio::test]
    async fn failure_mode_every_n() {
        let sink = RecordingSink::new("test")
            .with_failure_mode(FailureMode::EveryN(2))
            .with_failure_error(ProviderError::Connection("reset".into()));

        assert!(sink.deliver(&payload(1), "inbox").await.is_ok());
        let err = sink.deliver(&payload(2), "inbox").await.unwrap_err();
        assert!(matches!(err, ProviderError::Connection(_)));
        assert!(sink.deliver(&payload(3), "inbox").await.is_ok());
    }

    #[tokio::test]
    async fn failure_mode_always() {
        let sink = RecordingSink::new("test").with_failure_mode(FailureMode::Always);
        assert!(sink.deliver(&payload(1), "inbox").await.is_err());
        sink.assert_delivered(0);
    }
}
