use thiserror::Error;

/// Errors that can occur while building or running the pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An error occurred in the state store.
    #[error("state error: {0}")]
    State(#[from] tollgate_state::StateError),

    /// An admission or delivery queue rejected the work.
    #[error("executor error: {0}")]
    Executor(#[from] tollgate_executor::ExecutorError),

    /// An error from a source or sink call.
    #[error("provider error: {0}")]
    Provider(#[from] tollgate_provider::ProviderError),

    /// The pipeline was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}
