use async_trait::async_trait;
use tollgate_core::{ItemId, SearchCriteria, SourceItem};

use crate::error::ProviderError;

/// Client for the rate-limited system items are polled from.
///
/// This trait is **not** object-safe because it uses native `async fn`
/// methods. Use [`DynSourceClient`] for dynamic dispatch; every
/// `SourceClient` implements it through a blanket implementation.
pub trait SourceClient: Send + Sync {
    /// Name used in logs, metrics and circuit breaker keys.
    fn name(&self) -> &str;

    /// Search for items matching `criteria`.
    ///
    /// A source that cannot serve several identities in one call returns
    /// [`ProviderError::Unsupported`], which makes the scheduler fall back to
    /// one call per identity.
    fn search(
        &self,
        criteria: &SearchCriteria,
    ) -> impl std::future::Future<Output = Result<Vec<SourceItem>, ProviderError>> + Send;

    /// Fetch the full representation of a single item.
    fn fetch_detail(
        &self,
        id: &ItemId,
    ) -> impl std::future::Future<Output = Result<SourceItem, ProviderError>> + Send;
}

/// Object-safe source client for use behind `Arc<dyn DynSourceClient>`.
#[async_trait]
pub trait DynSourceClient: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<SourceItem>, ProviderError>;

    async fn fetch_detail(&self, id: &ItemId) -> Result<SourceItem, ProviderError>;
}

#[async_trait]
impl<T: SourceClient + Sync> DynSourceClient for T {
    fn name(&self) -> &str {
        SourceClient::name(self)
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<SourceItem>, ProviderError> {
        SourceClient::search(self, criteria).await
    }

    async fn fetch_detail(&self, id: &ItemId) -> Result<SourceItem, ProviderError> {
        SourceClient::fetch_detail(self, id).await
    }
}
