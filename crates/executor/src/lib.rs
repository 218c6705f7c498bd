pub mod admission;
pub mod circuit_breaker;
pub mod config;
pub mod cooldown;
pub mod delivery;
pub mod dlq;
pub mod error;
pub mod rate_window;
mod ready_queue;
pub mod retry;

pub use admission::{AdmissionQueue, TaskPhase};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry};
pub use config::{AdmissionConfig, DeliveryConfig, MIN_RATE_PER_SECOND};
pub use cooldown::{CooldownConfig, CooldownCoordinator};
pub use delivery::{DeliveryObserver, DeliveryQueue, DeliveryStats};
pub use dlq::{DeadLetterEntry, DeadLetterQueue, DeadLetterSink, StateDeadLetterSink};
pub use error::ExecutorError;
pub use rate_window::RateWindow;
pub use retry::RetryStrategy;
