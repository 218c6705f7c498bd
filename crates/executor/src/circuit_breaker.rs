use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tollgate_core::{CircuitSnapshot, CircuitStatus, MetricsSink, NoopMetrics};
use tollgate_provider::{ErrorClass, ProviderError};
use tollgate_state::PersistenceStore;

use crate::cooldown::CooldownCoordinator;
use crate::error::ExecutorError;

/// A state change as `(from, to)`.
pub type Transition = (CircuitStatus, CircuitStatus);

/// Configuration for a per-dependency circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure.
    pub reset_timeout: Duration,
    /// Minimum spacing between half-open trial calls.
    pub test_interval: Duration,
    /// Upper bound on a single protected call. A timeout counts as a
    /// transient failure.
    pub call_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Validate configuration values.
    ///
    /// `failure_threshold` must be >= 1. Zero durations are allowed
    /// (useful for testing).
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold < 1 {
            return Err("failure_threshold must be >= 1".into());
        }
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be > 0".into());
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            test_interval: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Internal mutable state for a single circuit breaker.
struct CircuitData {
    status: CircuitStatus,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_trial_time: Option<Instant>,
    /// Only one half-open trial may be outstanding at a time.
    trial_in_flight: bool,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_trial_time: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker for a single protected dependency.
///
/// - `Closed` -> `Open` when consecutive transient failures reach the threshold
/// - `Open` -> `HalfOpen` once `reset_timeout` has elapsed since the last failure
/// - `HalfOpen` admits one trial call per `test_interval`
/// - `HalfOpen` -> `Closed` on a successful trial, `HalfOpen` -> `Open` on a
///   failed one (restarting the timer)
///
/// Throttling responses are never counted as failures; they are forwarded to
/// the attached [`CooldownCoordinator`]. Permanent and unsupported errors are
/// caller errors and are not counted either.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    data: RwLock<CircuitData>,
    cooldown: Option<Arc<CooldownCoordinator>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    metrics: Arc<dyn MetricsSink>,
}

/// Clears the half-open trial flag if a trial call is dropped mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the given dependency.
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            data: RwLock::new(CircuitData::new()),
            cooldown: None,
            persistence: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Forward throttling responses to `cooldown`.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Arc<CooldownCoordinator>) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Save a snapshot to `store` on every state transition.
    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run `operation` under the breaker's protection.
    ///
    /// Returns [`ExecutorError::CooldownActive`] while the attached cooldown
    /// is open and [`ExecutorError::CircuitOpen`] when the circuit rejects
    /// the call, in both cases without polling `operation`. Otherwise records
    /// the outcome and propagates the operation's own error.
    pub async fn execute<T, F>(&self, operation: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(cooldown) = &self.cooldown {
            let remaining = cooldown.remaining();
            if !remaining.is_zero() {
                debug!(
                    dependency = %self.dependency,
                    remaining_ms = %remaining.as_millis(),
                    "cooldown active, call held back"
                );
                return Err(ExecutorError::CooldownActive { remaining });
            }
        }

        let transition = match self.check() {
            Ok(transition) => transition,
            Err(retry_in) => {
                self.metrics.increment("circuit.rejected");
                debug!(
                    dependency = %self.dependency,
                    retry_in_ms = %retry_in.as_millis(),
                    "circuit rejected call"
                );
                return Err(ExecutorError::CircuitOpen {
                    dependency: self.dependency.clone(),
                    retry_in,
                });
            }
        };
        let probing = self.status() == CircuitStatus::HalfOpen;
        if let Some(t) = transition {
            self.on_transition(t).await;
        }

        let mut guard = TrialGuard {
            breaker: self,
            armed: probing,
        };
        let result = tokio::time::timeout(self.config.call_timeout, operation)
            .await
            .unwrap_or_else(|_| Err(ProviderError::Timeout(self.config.call_timeout)));
        guard.armed = false;

        match result {
            Ok(value) => {
                if let Some(t) = self.record_success() {
                    self.on_transition(t).await;
                }
                Ok(value)
            }
            Err(err) => {
                match err.class() {
                    ErrorClass::Transient => {
                        if let Some(t) = self.record_failure() {
                            self.on_transition(t).await;
                        }
                    }
                    ErrorClass::Throttled => {
                        self.release_trial();
                        if let Some(cooldown) = &self.cooldown {
                            cooldown
                                .note_throttled(
                                    err.retry_after(),
                                    format!("{} throttled", self.dependency),
                                )
                                .await;
                        }
                    }
                    ErrorClass::Permanent | ErrorClass::Unsupported => self.release_trial(),
                }
                Err(ExecutorError::Provider(err))
            }
        }
    }

    /// Decide whether a call may proceed.
    ///
    /// May move `Open` to `HalfOpen` once the reset timeout has elapsed.
    /// Returns the transition that occurred, or `Err(retry_in)` when the call
    /// must be rejected.
    pub fn check(&self) -> Result<Option<Transition>, Duration> {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();

        match data.status {
            CircuitStatus::Closed => Ok(None),
            CircuitStatus::Open => {
                let elapsed = data
                    .last_failure_time
                    .map_or(self.config.reset_timeout, |t| now.duration_since(t));
                if elapsed < self.config.reset_timeout {
                    return Err(self.config.reset_timeout - elapsed);
                }
                debug!(
                    dependency = %self.dependency,
                    "circuit breaker transitioning from open to half-open"
                );
                data.status = CircuitStatus::HalfOpen;
                data.trial_in_flight = true;
                data.last_trial_time = Some(now);
                Ok(Some((CircuitStatus::Open, CircuitStatus::HalfOpen)))
            }
            CircuitStatus::HalfOpen => {
                if data.trial_in_flight {
                    return Err(self.config.test_interval);
                }
                let since_trial = data
                    .last_trial_time
                    .map_or(self.config.test_interval, |t| now.duration_since(t));
                if since_trial < self.config.test_interval {
                    return Err(self.config.test_interval - since_trial);
                }
                data.trial_in_flight = true;
                data.last_trial_time = Some(now);
                Ok(None)
            }
        }
    }

    /// Record a successful call.
    ///
    /// Returns `Some((from, to))` if a state transition occurred.
    pub fn record_success(&self) -> Option<Transition> {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match data.status {
            CircuitStatus::HalfOpen => {
                info!(
                    dependency = %self.dependency,
                    "circuit breaker closing after successful trial"
                );
                data.status = CircuitStatus::Closed;
                data.failure_count = 0;
                data.trial_in_flight = false;
                Some((CircuitStatus::HalfOpen, CircuitStatus::Closed))
            }
            CircuitStatus::Closed => {
                data.failure_count = 0;
                None
            }
            CircuitStatus::Open => None,
        }
    }

    /// Record a transient failure.
    ///
    /// Returns `Some((from, to))` if a state transition occurred.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();

        match data.status {
            CircuitStatus::Closed => {
                data.failure_count += 1;
                data.last_failure_time = Some(now);
                if data.failure_count >= self.config.failure_threshold {
                    info!(
                        dependency = %self.dependency,
                        failures = data.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opening"
                    );
                    data.status = CircuitStatus::Open;
                    Some((CircuitStatus::Closed, CircuitStatus::Open))
                } else {
                    None
                }
            }
            CircuitStatus::HalfOpen => {
                info!(
                    dependency = %self.dependency,
                    "circuit breaker re-opening after half-open trial failure"
                );
                data.status = CircuitStatus::Open;
                data.failure_count += 1;
                data.last_failure_time = Some(now);
                data.trial_in_flight = false;
                Some((CircuitStatus::HalfOpen, CircuitStatus::Open))
            }
            CircuitStatus::Open => {
                data.last_failure_time = Some(now);
                None
            }
        }
    }

    /// End an outstanding half-open trial without a verdict.
    fn release_trial(&self) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        data.trial_in_flight = false;
    }

    /// Current status without triggering transitions.
    pub fn status(&self) -> CircuitStatus {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .status
    }

    /// Consecutive failures counted so far.
    pub fn failure_count(&self) -> u32 {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .failure_count
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Name of the protected dependency.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Force the circuit closed.
    pub async fn reset(&self) {
        let from = {
            let mut data = self
                .data
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let from = data.status;
            *data = CircuitData::new();
            from
        };
        if from != CircuitStatus::Closed {
            self.on_transition((from, CircuitStatus::Closed)).await;
        }
    }

    /// Force the circuit open, as if the dependency had just failed.
    pub async fn trip(&self) {
        let from = {
            let mut data = self
                .data
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let from = data.status;
            data.status = CircuitStatus::Open;
            data.last_failure_time = Some(Instant::now());
            data.trial_in_flight = false;
            from
        };
        if from != CircuitStatus::Open {
            self.on_transition((from, CircuitStatus::Open)).await;
        }
    }

    /// Wall-clock view of the breaker state.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let data = self
            .data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        CircuitSnapshot {
            status: data.status,
            failure_count: data.failure_count,
            last_failure_time: data.last_failure_time.map(to_wall_clock),
            last_trial_time: data.last_trial_time.map(to_wall_clock),
        }
    }

    /// Apply a snapshot taken earlier, e.g. by a previous process.
    pub fn restore(&self, snapshot: &CircuitSnapshot) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        data.status = snapshot.status;
        data.failure_count = snapshot.failure_count;
        data.last_failure_time = snapshot.last_failure_time.map(to_instant);
        data.last_trial_time = snapshot.last_trial_time.map(to_instant);
        data.trial_in_flight = false;
    }

    /// Restore state from the attached persistence store, if any.
    pub async fn load(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        match store.load_circuit_state(&self.dependency).await {
            Ok(Some(snapshot)) => {
                info!(
                    dependency = %self.dependency,
                    status = %snapshot.status,
                    "restored circuit breaker state"
                );
                self.restore(&snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(
                dependency = %self.dependency,
                error = %e,
                "failed to load circuit breaker state"
            ),
        }
    }

    async fn on_transition(&self, (from, to): Transition) {
        debug!(dependency = %self.dependency, %from, %to, "circuit transition");
        match to {
            CircuitStatus::Open => self.metrics.increment("circuit.opened"),
            CircuitStatus::Closed => self.metrics.increment("circuit.closed"),
            CircuitStatus::HalfOpen => {}
        }
        let Some(store) = &self.persistence else {
            return;
        };
        if let Err(e) = store
            .save_circuit_state(&self.dependency, &self.snapshot())
            .await
        {
            warn!(
                dependency = %self.dependency,
                error = %e,
                "failed to persist circuit breaker state"
            );
        }
    }
}

fn to_wall_clock(instant: Instant) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(instant.elapsed()).unwrap_or_default();
    Utc::now() - age
}

fn to_instant(time: DateTime<Utc>) -> Instant {
    let now = Instant::now();
    (Utc::now() - time)
        .to_std()
        .ok()
        .and_then(|age| now.checked_sub(age))
        .unwrap_or(now)
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self
            .data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("status", &data.status)
            .field("failure_count", &data.failure_count)
            .finish_non_exhaustive()
    }
}

/// Circuit breakers for every protected dependency, keyed by name.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker under its dependency name, replacing any previous
    /// one, and return a shared handle.
    pub fn register(&mut self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(breaker);
        self.breakers
            .insert(breaker.dependency().to_owned(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, dependency: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(dependency)
    }

    /// Sorted list of registered dependency names.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.breakers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Current status of every breaker, sorted by name.
    pub fn statuses(&self) -> Vec<(String, CircuitStatus)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.status()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Restore every breaker from its persistence store.
    pub async fn load_all(&self) {
        for breaker in self.breakers.values() {
            breaker.load().await;
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tollgate_core::MetricsRecorder;
    use tollgate_state::StatePersistence;
    use tollgate_state_memory::MemoryStateStore;

    use super::*;
    use crate::cooldown::CooldownConfig;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            test_interval: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), ExecutorError> {
        cb.execute(async { Err::<(), _>(ProviderError::Connection("reset".into())) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), ExecutorError> {
        cb.execute(async { Ok::<_, ProviderError>(()) }).await
    }

    #[test]
    fn config_validation() {
        assert!(test_config().validate().is_ok());
        let zero = CircuitBreakerConfig {
            failure_threshold: 0,
            ..test_config()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_skips_operation() {
        let cb = CircuitBreaker::new("source", test_config());
        for _ in 0..3 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.status(), CircuitStatus::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(())
            })
            .await;
        assert!(matches!(result, Err(ExecutorError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must not run");
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let cb = CircuitBreaker::new("source", test_config());
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let cb = Arc::new(CircuitBreaker::new("source", test_config()));
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        // Hold the trial open while a second caller arrives.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = Arc::clone(&cb);
            tokio::spawn(async move {
                cb.execute(async move {
                    let _ = release_rx.await;
                    Ok::<_, ProviderError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(cb.status(), CircuitStatus::HalfOpen);

        let second = succeed(&cb).await;
        assert!(matches!(second, Err(ExecutorError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_restarts_timer() {
        let cb = CircuitBreaker::new("source", test_config());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let trial = fail(&cb).await;
        assert!(matches!(trial, Err(ExecutorError::Provider(_))));
        assert_eq!(cb.status(), CircuitStatus::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(
            succeed(&cb).await,
            Err(ExecutorError::CircuitOpen { .. })
        ));

        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn inconclusive_trial_waits_for_test_interval() {
        let cb = CircuitBreaker::new("source", test_config());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        // A permanent error is not a verdict on dependency health.
        let trial = cb
            .execute(async { Err::<(), _>(ProviderError::Rejected("bad".into())) })
            .await;
        assert!(matches!(trial, Err(ExecutorError::Provider(_))));
        assert_eq!(cb.status(), CircuitStatus::HalfOpen);

        let too_soon = succeed(&cb).await;
        match too_soon {
            Err(ExecutorError::CircuitOpen { retry_in, .. }) => {
                assert_eq!(retry_in, Duration::from_secs(10));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_feeds_cooldown_not_failure_count() {
        let cooldown = Arc::new(CooldownCoordinator::new(CooldownConfig::default()));
        let cb = CircuitBreaker::new("sink", test_config()).with_cooldown(Arc::clone(&cooldown));

        for _ in 0..5 {
            let result = cb
                .execute(async {
                    Err::<(), _>(ProviderError::Throttled {
                        retry_after: Some(Duration::from_secs(5)),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(cb.status(), CircuitStatus::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cooldown.is_active());
        assert_eq!(cooldown.remaining(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn active_cooldown_holds_calls_back() {
        let cooldown = Arc::new(CooldownCoordinator::new(CooldownConfig::default()));
        let cb = CircuitBreaker::new("source", test_config()).with_cooldown(Arc::clone(&cooldown));
        cooldown
            .note_throttled(Some(Duration::from_secs(5)), "source throttled")
            .await;

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(())
            })
            .await;
        match result {
            Err(err @ ExecutorError::CooldownActive { remaining }) => {
                assert_eq!(remaining, Duration::from_secs(5));
                assert!(err.is_deferral());
            }
            other => panic!("expected CooldownActive, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.failure_count(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&cb).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient_failure() {
        let cb = CircuitBreaker::new(
            "source",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..test_config()
            },
        );
        let result = cb
            .execute(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, ProviderError>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ExecutorError::Provider(ProviderError::Timeout(_)))
        ));
        assert_eq!(cb.status(), CircuitStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_counted() {
        let metrics = Arc::new(MetricsRecorder::new());
        let cb = CircuitBreaker::new("source", test_config()).with_metrics(metrics.clone());
        for _ in 0..3 {
            fail(&cb).await.unwrap_err();
        }
        succeed(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(61)).await;
        succeed(&cb).await.unwrap();

        assert_eq!(metrics.counter("circuit.opened"), 1);
        assert_eq!(metrics.counter("circuit.rejected"), 1);
        assert_eq!(metrics.counter("circuit.closed"), 1);
    }

    #[tokio::test]
    async fn manual_trip_and_reset() {
        let cb = CircuitBreaker::new("sink", test_config());
        cb.trip().await;
        assert_eq!(cb.status(), CircuitStatus::Open);
        assert!(succeed(&cb).await.is_err());
        cb.reset().await;
        assert_eq!(cb.status(), CircuitStatus::Closed);
        succeed(&cb).await.unwrap();
    }

    #[tokio::test]
    async fn open_state_survives_restart() {
        let store: Arc<dyn PersistenceStore> = Arc::new(StatePersistence::new(
            Arc::new(MemoryStateStore::new()),
            "test",
        ));

        let before = CircuitBreaker::new("source", test_config())
            .with_persistence(Arc::clone(&store));
        for _ in 0..3 {
            fail(&before).await.unwrap_err();
        }

        let after = CircuitBreaker::new("source", test_config()).with_persistence(store);
        assert_eq!(after.status(), CircuitStatus::Closed);
        after.load().await;
        assert_eq!(after.status(), CircuitStatus::Open);
        assert_eq!(after.failure_count(), 3);
        assert!(matches!(
            succeed(&after).await,
            Err(ExecutorError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = CircuitBreakerRegistry::new();
        registry.register(CircuitBreaker::new("sink", test_config()));
        registry.register(CircuitBreaker::new("source", test_config()));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.dependencies(), vec!["sink", "source"]);
        assert!(registry.get("source").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(
            registry.statuses(),
            vec![
                ("sink".to_owned(), CircuitStatus::Closed),
                ("source".to_owned(), CircuitStatus::Closed),
            ]
        );
    }
}
