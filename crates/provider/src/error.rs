use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a dependency error.
///
/// The class decides which mechanism reacts to the error: throttling feeds the
/// cooldown coordinator, transient errors feed the circuit breaker and the
/// retry loops, permanent errors surface immediately, and unsupported errors
/// trigger the scheduler's per-identity fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider-signaled rate limit (HTTP 429 class).
    Throttled,
    /// Network, timeout or 5xx-class failure.
    Transient,
    /// Validation or other 4xx-class failure. Never retried.
    Permanent,
    /// The request is not supported at this granularity (HTTP 404 class).
    Unsupported,
}

/// Errors returned by source and sink clients.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider rejected the request due to rate limiting.
    #[error("throttled by provider{}", retry_after_suffix(.retry_after))]
    Throttled {
        /// Provider-supplied backoff hint.
        retry_after: Option<Duration>,
    },

    /// The provider did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The provider answered with a server-side (5xx) failure.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The request shape is not supported (e.g. a multi-identity query the
    /// endpoint cannot serve).
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// The provider rejected the request as invalid.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[allow(clippy::ref_option)]
fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after.map_or_else(String::new, |d| format!(" (retry after {d:?})"))
}

impl ProviderError {
    /// Map an HTTP-style status code onto the error taxonomy.
    ///
    /// Returns `None` for success codes.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Option<Self> {
        let message = message.into();
        match status {
            200..=399 => None,
            429 => Some(Self::Throttled { retry_after }),
            404 => Some(Self::Unsupported(message)),
            408 => Some(Self::Timeout(retry_after.unwrap_or_default())),
            500..=599 => Some(Self::Unavailable(format!("{status}: {message}"))),
            _ => Some(Self::Rejected(format!("{status}: {message}"))),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Throttled { .. } => ErrorClass::Throttled,
            Self::Timeout(_) | Self::Connection(_) | Self::Unavailable(_) => {
                ErrorClass::Transient
            }
            Self::Unsupported(_) => ErrorClass::Unsupported,
            Self::Rejected(_) | Self::Serialization(_) => ErrorClass::Permanent,
        }
    }

    /// Returns `true` if the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Throttled)
    }

    /// Returns `true` for provider-signaled rate limits.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Provider backoff hint, if the error carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short error code used in logs and dead-letter records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Throttled { .. } => "THROTTLED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Connection(_) => "CONNECTION",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::Rejected(_) => "REJECTED",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(ProviderError::Connection("reset".into()).is_retryable());
        assert!(ProviderError::Unavailable("503".into()).is_retryable());
        assert!(ProviderError::Throttled { retry_after: None }.is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!ProviderError::Rejected("x".into()).is_retryable());
        assert!(!ProviderError::Unsupported("x".into()).is_retryable());
        assert!(!ProviderError::Serialization("x".into()).is_retryable());
    }

    #[test]
    fn classification() {
        assert_eq!(
            ProviderError::Throttled { retry_after: None }.class(),
            ErrorClass::Throttled
        );
        assert_eq!(
            ProviderError::Connection("x".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ProviderError::Rejected("x".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            ProviderError::Unsupported("x".into()).class(),
            ErrorClass::Unsupported
        );
    }

    #[test]
    fn from_status_mapping() {
        assert!(ProviderError::from_status(200, "ok", None).is_none());

        let throttled = ProviderError::from_status(429, "slow down", Some(Duration::from_secs(7)))
            .unwrap();
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(7)));

        assert!(matches!(
            ProviderError::from_status(404, "no batch endpoint", None),
            Some(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            ProviderError::from_status(502, "bad gateway", None),
            Some(ProviderError::Unavailable(_))
        ));
        assert!(matches!(
            ProviderError::from_status(422, "bad field", None),
            Some(ProviderError::Rejected(_))
        ));
    }

    #[test]
    fn error_display() {
        let err = ProviderError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "timeout after 500ms");

        let err = ProviderError::Throttled { retry_after: None };
        assert_eq!(err.to_string(), "throttled by provider");

        let err = ProviderError::Throttled {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.to_string(), "throttled by provider (retry after 2s)");
    }
}
