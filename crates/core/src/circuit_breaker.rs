use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Normal operation: requests flow through.
    #[default]
    Closed,
    /// Dependency is failing: requests are rejected immediately.
    Open,
    /// Recovery trial: one request per test interval is let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Persistable view of a single circuit breaker.
///
/// Times are wall-clock so that a snapshot taken before a restart can be
/// mapped back onto the monotonic clock of the new process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Current circuit state.
    pub status: CircuitStatus,
    /// Consecutive dependency failures counted while closed.
    pub failure_count: u32,
    /// Time of the most recent counted failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Time of the most recent half-open trial.
    pub last_trial_time: Option<DateTime<Utc>>,
}
