use std::time::Duration;

use serde::Deserialize;
use tollgate_core::Priority;
use tollgate_gateway::StreamConfig;

/// One monitored stream.
///
/// # Example
///
/// ```toml
/// [[streams]]
/// name = "rust-issues"
/// destination = "#rust-alerts"
/// identities = ["alice", "bob"]
/// priority = 10
///
/// [streams.params]
/// label = "bug"
/// ```
#[derive(Debug, Deserialize)]
pub struct StreamServerConfig {
    pub name: String,
    /// Where the sink should deliver this stream's items.
    pub destination: String,
    #[serde(default)]
    pub identities: Vec<String>,
    /// Query parameters passed through to the source unchanged.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    /// Dedup scope; defaults to the stream name.
    pub scope: Option<String>,
    /// Overrides the scheduler's base delay for this stream.
    pub base_delay_ms: Option<u64>,
    /// Fetch each new item's full representation before delivery.
    #[serde(default)]
    pub fetch_details: bool,
}

impl StreamServerConfig {
    pub fn to_stream(&self) -> StreamConfig {
        let mut stream = StreamConfig::new(self.name.as_str(), self.destination.as_str())
            .with_identities(self.identities.iter().map(String::as_str))
            .with_params(self.params.clone())
            .with_priority(Priority(self.priority))
            .with_fetch_details(self.fetch_details);
        if let Some(scope) = &self.scope {
            stream = stream.with_scope(scope.as_str());
        }
        if let Some(ms) = self.base_delay_ms {
            stream = stream.with_base_delay(Duration::from_millis(ms));
        }
        stream
    }
}
