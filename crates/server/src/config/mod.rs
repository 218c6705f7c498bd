mod executor;
mod scheduler;
mod simulation;
mod state;
mod streams;


pub use executor::*;
pub use scheduler::*;
pub use simulation::*;
pub use state::*;
pub use streams::*;

use serde::Deserialize;

/// Top-level configuration for the Tollgate server, loaded from a TOML file.
///
/// Every section is optional; an empty file yields a runnable default
/// configuration with no streams.
#[derive(Debug, Default, Deserialize)]
pub struct TollgateConfig {
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Source call throttling.
    #[serde(default)]
    pub admission: AdmissionServerConfig,
    /// Sink delivery pacing.
    #[serde(default)]
    pub delivery: DeliveryServerConfig,
    /// Breaker settings for both dependencies.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerServerConfig,
    /// Shared throttle backoff.
    #[serde(default)]
    pub cooldown: CooldownServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerServerConfig,
    #[serde(default)]
    pub cadence: CadenceServerConfig,
    #[serde(default)]
    pub dedup: DedupServerConfig,
    /// In-process source and sink.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Monitored streams.
    #[serde(default)]
    pub streams: Vec<StreamServerConfig>,
}
