use std::time::Duration;

use thiserror::Error;
use tollgate_provider::{ErrorClass, ProviderError};

/// Errors surfaced by the admission queue, circuit breaker and delivery queue.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// The dependency's circuit is open; the call never left the process.
    #[error("circuit open for {dependency} (retry in {retry_in:?})")]
    CircuitOpen {
        dependency: String,
        /// Time until the breaker will admit a trial call.
        retry_in: Duration,
    },

    /// A process-wide cooldown is active.
    #[error("cooldown active for another {remaining:?}")]
    CooldownActive { remaining: Duration },

    /// The caller gave up waiting for admission.
    #[error("admission timed out after {0:?}")]
    AdmissionTimeout(Duration),

    /// The queue is at capacity.
    #[error("queue full (capacity {0})")]
    QueueFull(usize),

    /// `add` was called before `initialize`.
    #[error("queue not initialized")]
    NotInitialized,

    /// The queue has been stopped.
    #[error("queue stopped")]
    Stopped,

    /// The dependency call itself failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExecutorError {
    /// The provider error behind this failure, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(err) | Self::Exhausted { last: err, .. } => Some(err),
            _ => None,
        }
    }

    /// Class of the underlying provider error.
    pub fn class(&self) -> Option<ErrorClass> {
        self.provider_error().map(ProviderError::class)
    }

    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(err) if err.is_retryable())
    }

    /// Circuit-open and cooldown mean "try this unit of work later".
    pub fn is_deferral(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::CooldownActive { .. })
    }

    /// Short error code used in logs and dead-letter records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Self::AdmissionTimeout(_) => "ADMISSION_TIMEOUT",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Stopped => "STOPPED",
            Self::Provider(err) => err.code(),
            Self::Exhausted { .. } => "EXHAUSTED",
            Self::Config(_) => "CONFIG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_retryable_provider_errors() {
        assert!(ExecutorError::Provider(ProviderError::Connection("x".into())).is_retryable());
        assert!(!ExecutorError::Provider(ProviderError::Rejected("x".into())).is_retryable());
        assert!(
            !ExecutorError::CircuitOpen {
                dependency: "source".into(),
                retry_in: Duration::ZERO,
            }
            .is_retryable()
        );
        assert!(
            !ExecutorError::Exhausted {
                attempts: 4,
                last: ProviderError::Connection("x".into()),
            }
            .is_retryable()
        );
    }

    #[test]
    fn deferrals() {
        assert!(
            ExecutorError::CooldownActive {
                remaining: Duration::from_secs(1)
            }
            .is_deferral()
        );
        assert!(!ExecutorError::Stopped.is_deferral());
    }

    #[test]
    fn exhausted_exposes_last_provider_error() {
        let err = ExecutorError::Exhausted {
            attempts: 4,
            last: ProviderError::Unavailable("503".into()),
        };
        assert_eq!(err.class(), Some(ErrorClass::Transient));
        assert_eq!(err.code(), "EXHAUSTED");
        assert_eq!(
            err.to_string(),
            "gave up after 4 attempts: provider unavailable: 503"
        );
    }
}
