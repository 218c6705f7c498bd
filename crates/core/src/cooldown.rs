use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistable view of the process-wide cooldown window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownSnapshot {
    /// End of the active window, `None` when no cooldown has been recorded.
    pub active_until: Option<DateTime<Utc>>,
    /// Why the window was opened (e.g. `"source throttled"`).
    #[serde(default)]
    pub reason: String,
}

impl CooldownSnapshot {
    /// Whether the recorded window is still open at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_until.is_some_and(|until| until > now)
    }
}
