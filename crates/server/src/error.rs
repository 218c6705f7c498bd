use thiserror::Error;

/// Errors that can occur when running the Tollgate server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`TollgateConfig`](crate::config::TollgateConfig).
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// The pipeline could not be built or started.
    #[error("pipeline error: {0}")]
    Gateway(#[from] tollgate_gateway::GatewayError),
}
