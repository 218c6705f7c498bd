use tollgate_core::SinkAck;
use tracing::info;

use crate::error::ProviderError;
use crate::sink::SinkClient;

/// A sink that logs each delivery and acknowledges it without performing any
/// external I/O.
///
/// Useful for local runs and simulations where no real sink endpoint exists.
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new `LogSink` with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SinkClient for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
    ) -> Result<SinkAck, ProviderError> {
        info!(
            sink = %self.name,
            destination,
            payload = %payload,
            "log sink delivered message"
        );
        Ok(SinkAck {
            receipt: None,
            body: serde_json::json!({
                "sink": self.name,
                "logged": true,
            }),
        })
    }
}
