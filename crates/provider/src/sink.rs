use async_trait::async_trait;
use tollgate_core::SinkAck;

use crate::error::ProviderError;

/// Client for the rate-limited system accepted items are delivered to.
///
/// Like [`SourceClient`](crate::SourceClient), this uses native `async fn`
/// and is bridged to [`DynSinkClient`] by a blanket implementation.
pub trait SinkClient: Send + Sync {
    /// Name used in logs, metrics and circuit breaker keys.
    fn name(&self) -> &str;

    /// Deliver `payload` to `destination`.
    fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
    ) -> impl std::future::Future<Output = Result<SinkAck, ProviderError>> + Send;
}

/// Object-safe sink client for use behind `Arc<dyn DynSinkClient>`.
#[async_trait]
pub trait DynSinkClient: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
    ) -> Result<SinkAck, ProviderError>;
}

#[async_trait]
impl<T: SinkClient + Sync> DynSinkClient for T {
    fn name(&self) -> &str {
        SinkClient::name(self)
    }

    async fn deliver(
        &self,
        payload: &serde_json::Value,
        destination: &str,
    ) -> Result<SinkAck, ProviderError> {
        SinkClient::deliver(self, payload, destination).await
    }
}
