use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use tollgate_core::{CooldownSnapshot, MetricsSink, NoopMetrics};
use tollgate_state::PersistenceStore;

use crate::ready_queue::deadline_after;

/// Configuration for the [`CooldownCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownConfig {
    /// Window length when a throttling response carries no retry-after hint.
    pub default_backoff: Duration,
    /// Upper bound applied to provider hints.
    pub max_backoff: Duration,
}

impl CooldownConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_backoff > self.max_backoff {
            return Err("default_backoff must not exceed max_backoff".into());
        }
        Ok(())
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            default_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct CooldownData {
    active_until: Option<Instant>,
    reason: String,
}

/// Process-wide throttle-backoff signal.
///
/// Any caller that sees a throttling response records it here; every path
/// that would contact the source or sink checks [`is_active`](Self::is_active)
/// first and defers while it is. One instance is shared by `Arc` between all
/// queues and the scheduler, so a single rate-limit violation pauses every
/// logical stream instead of each one tripping over it separately.
pub struct CooldownCoordinator {
    config: CooldownConfig,
    data: Mutex<CooldownData>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    metrics: Arc<dyn MetricsSink>,
}

impl CooldownCoordinator {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            data: Mutex::new(CooldownData::default()),
            persistence: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Persist every change to `store`.
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

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Record a throttling response.
    ///
    /// The window becomes `now + retry_after` (or the default backoff),
    /// clamped to `max_backoff`. An active window is only ever extended,
    /// never shortened. Returns the remaining cooldown afterwards.
    pub async fn note_throttled(
        &self,
        retry_after: Option<Duration>,
        reason: impl Into<String>,
    ) -> Duration {
        let backoff = retry_after
            .unwrap_or(self.config.default_backoff)
            .min(self.config.max_backoff);
        let until = deadline_after(backoff);
        let reason = reason.into();

        let extended = {
            let mut data = self.data.lock();
            if data.active_until.is_some_and(|current| current >= until) {
                false
            } else {
                data.active_until = Some(until);
                data.reason.clone_from(&reason);
                true
            }
        };

        if extended {
            info!(
                backoff_ms = %backoff.as_millis(),
                reason = %reason,
                "cooldown activated"
            );
            self.metrics.increment("cooldown.activated");
            self.persist().await;
        }
        self.remaining()
    }

    /// Whether a cooldown window is currently open.
    pub fn is_active(&self) -> bool {
        self.data
            .lock()
            .active_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Time left in the current window, zero when inactive.
    pub fn remaining(&self) -> Duration {
        self.data
            .lock()
            .active_until
            .map_or(Duration::ZERO, |until| {
                until.saturating_duration_since(Instant::now())
            })
    }

    /// Reason recorded with the most recent window.
    pub fn reason(&self) -> String {
        self.data.lock().reason.clone()
    }

    /// Sleep until no cooldown is active.
    ///
    /// Re-checks after each sleep because the window may have been extended
    /// in the meantime.
    pub async fn wait(&self) {
        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining).await;
        }
    }

    /// End the current window immediately.
    pub async fn clear(&self) {
        {
            let mut data = self.data.lock();
            data.active_until = None;
            data.reason.clear();
        }
        self.persist().await;
    }

    /// Wall-clock view of the current window.
    pub fn snapshot(&self) -> CooldownSnapshot {
        let data = self.data.lock();
        let now = Instant::now();
        CooldownSnapshot {
            active_until: data
                .active_until
                .filter(|until| *until > now)
                .and_then(|until| chrono::Duration::from_std(until - now).ok())
                .and_then(|left| Utc::now().checked_add_signed(left)),
            reason: data.reason.clone(),
        }
    }

    /// Apply a snapshot taken earlier, e.g. by a previous process.
    ///
    /// Windows that already ended are ignored.
    pub fn restore(&self, snapshot: &CooldownSnapshot) {
        let Some(until) = snapshot.active_until else {
            return;
        };
        let Ok(left) = (until - Utc::now()).to_std() else {
            return;
        };
        let mut data = self.data.lock();
        let restored = deadline_after(left.min(self.config.max_backoff));
        if data.active_until.is_none_or(|current| current < restored) {
            data.active_until = Some(restored);
            data.reason.clone_from(&snapshot.reason);
        }
    }

    /// Restore the window from the attached persistence store, if any.
    pub async fn load(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        match store.load_cooldown_state().await {
            Ok(Some(snapshot)) => self.restore(&snapshot),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load cooldown state"),
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        let snapshot = self.snapshot();
        if let Err(e) = store.save_cooldown_state(&snapshot).await {
            warn!(error = %e, "failed to persist cooldown state");
        }
    }
}

impl std::fmt::Debug for CooldownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownCoordinator")
            .field("config", &self.config)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::MetricsRecorder;
    use tollgate_state::StatePersistence;
    use tollgate_state_memory::MemoryStateStore;

    use super::*;

    fn coordinator() -> CooldownCoordinator {
        CooldownCoordinator::new(CooldownConfig {
            default_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(120),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_hint_opens_window() {
        let cd = coordinator();
        assert!(!cd.is_active());
        assert_eq!(cd.remaining(), Duration::ZERO);

        cd.note_throttled(Some(Duration::from_millis(5000)), "source throttled")
            .await;
        assert!(cd.is_active());

        tokio::time::advance(Duration::from_millis(4900)).await;
        assert!(cd.is_active());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!cd.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hint_uses_default_backoff() {
        let cd = coordinator();
        cd.note_throttled(None, "sink throttled").await;
        assert_eq!(cd.remaining(), Duration::from_secs(30));
        assert_eq!(cd.reason(), "sink throttled");
    }

    #[tokio::test(start_paused = true)]
    async fn hints_are_clamped_to_max_backoff() {
        let cd = coordinator();
        cd.note_throttled(Some(Duration::from_secs(3600)), "x").await;
        assert_eq!(cd.remaining(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn active_window_is_never_shortened() {
        let cd = coordinator();
        cd.note_throttled(Some(Duration::from_secs(60)), "long").await;
        cd.note_throttled(Some(Duration::from_secs(5)), "short").await;
        assert_eq!(cd.remaining(), Duration::from_secs(60));
        assert_eq!(cd.reason(), "long");

        cd.note_throttled(Some(Duration::from_secs(90)), "longer").await;
        assert_eq!(cd.remaining(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_window_closes() {
        let cd = coordinator();
        cd.note_throttled(Some(Duration::from_secs(10)), "x").await;
        let start = Instant::now();
        cd.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(!cd.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_ends_window() {
        let cd = coordinator();
        cd.note_throttled(None, "x").await;
        cd.clear().await;
        assert!(!cd.is_active());
    }

    #[tokio::test]
    async fn activation_is_counted() {
        let metrics = Arc::new(MetricsRecorder::new());
        let cd = coordinator().with_metrics(metrics.clone());
        cd.note_throttled(Some(Duration::from_secs(10)), "a").await;
        // Shorter hint does not extend the window and is not counted.
        cd.note_throttled(Some(Duration::from_secs(1)), "b").await;
        assert_eq!(metrics.counter("cooldown.activated"), 1);
    }

    #[tokio::test]
    async fn window_survives_restart_through_persistence() {
        let store: Arc<dyn PersistenceStore> = Arc::new(StatePersistence::new(
            Arc::new(MemoryStateStore::new()),
            "test",
        ));

        let first = coordinator().with_persistence(Arc::clone(&store));
        first
            .note_throttled(Some(Duration::from_secs(100)), "source throttled")
            .await;

        let second = coordinator().with_persistence(store);
        assert!(!second.is_active());
        second.load().await;
        assert!(second.is_active());
        assert!(second.remaining() > Duration::from_secs(90));
        assert_eq!(second.reason(), "source throttled");
    }

    #[test]
    fn expired_snapshot_is_ignored() {
        let cd = coordinator();
        cd.restore(&CooldownSnapshot {
            active_until: Some(Utc::now() - chrono::Duration::seconds(5)),
            reason: "old".into(),
        });
        assert!(!cd.is_active());
    }

    #[test]
    fn config_validation() {
        assert!(CooldownConfig::default().validate().is_ok());
        let bad = CooldownConfig {
            default_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
        };
        assert!(bad.validate().is_err());
    }
}
