pub mod client_factory;
pub mod config;
pub mod error;
pub mod pipeline_factory;
pub mod state_factory;
pub mod telemetry;
