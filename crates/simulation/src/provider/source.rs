//! Source that serves a fixed set of items and replays scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tollgate_core::{IdentityId, ItemId, SearchCriteria, SourceItem};
use tollgate_provider::{ProviderError, SourceClient};

/// An in-memory source for exercising the scheduler without a real backend.
///
/// Items are matched by identity and filtered by the `since` bound of each
/// search. Failures queued with [`fail_next`](Self::fail_next) are returned
/// in order, one per call, before any normal result. A batch limit set with
/// [`with_max_batch`](Self::with_max_batch) makes wider searches fail with
/// [`ProviderError::Unsupported`].
///
/// # Example
///
/// ```
/// use tollgate_simulation::ScriptedSource;
///
/// let source = ScriptedSource::new("tickets")
///     .with_item("alice", "T1", serde_json::json!({"title": "first"}))
///     .with_max_batch(1);
/// assert_eq!(source.item_count(), 1);
/// ```
pub struct ScriptedSource {
    name: String,
    items: Mutex<Vec<SourceItem>>,
    max_batch: Option<usize>,
    delay: Option<Duration>,
    script: Mutex<VecDeque<ProviderError>>,
    failing_identities: Mutex<HashMap<IdentityId, ProviderError>>,
    searches: Mutex<Vec<SearchCriteria>>,
    detail_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Vec::new()),
            max_batch: None,
            delay: None,
            script: Mutex::new(VecDeque::new()),
            failing_identities: Mutex::new(HashMap::new()),
            searches: Mutex::new(Vec::new()),
            detail_calls: AtomicUsize::new(0),
        }
    }

    /// Add an item owned by `identity`.
    #[must_use]
    pub fn with_item(
        self,
        identity: impl Into<IdentityId>,
        id: impl Into<ItemId>,
        payload: serde_json::Value,
    ) -> Self {
        self.push_item(SourceItem::new(id, identity, payload));
        self
    }

    /// Reject searches covering more than `n` identities.
    #[must_use]
    pub fn with_max_batch(mut self, n: usize) -> Self {
        self.max_batch = Some(n);
        self
    }

    /// Add latency to every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a one-shot failure for the next call.
    #[must_use]
    pub fn fail_next(self, error: ProviderError) -> Self {
        self.push_failure(error);
        self
    }

    /// Fail every search that includes `identity`.
    #[must_use]
    pub fn fail_identity(self, identity: impl Into<IdentityId>, error: ProviderError) -> Self {
        self.failing_identities.lock().insert(identity.into(), error);
        self
    }

    /// Add an item after construction, e.g. between two monitor cycles.
    pub fn push_item(&self, item: SourceItem) {
        self.items.lock().push(item);
    }

    /// Queue a failure after construction.
    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().push_back(error);
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    /// Every search received so far, in call order.
    pub fn searches(&self) -> Vec<SearchCriteria> {
        self.searches.lock().clone()
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().len()
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    /// Forget recorded calls. Items and queued failures are kept.
    pub fn clear(&self) {
        self.searches.lock().clear();
        self.detail_calls.store(0, Ordering::SeqCst);
    }

    /// Assert that exactly `n` searches were made.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_searched(&self, n: usize) {
        let actual = self.search_count();
        assert_eq!(
            actual, n,
            "expected source '{}' to be searched {n} times, but it was searched {actual} times",
            self.name
        );
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn scripted_failure(&self, criteria: &SearchCriteria) -> Option<ProviderError> {
        if let Some(err) = self.script.lock().pop_front() {
            return Some(err);
        }
        if let Some(max) = self.max_batch
            && criteria.identities.len() > max
        {
            return Some(ProviderError::Unsupported(format!(
                "at most {max} identities per search, got {}",
                criteria.identities.len()
            )));
        }
        let failing = self.failing_identities.lock();
        criteria
            .identities
            .iter()
            .find_map(|identity| failing.get(identity).cloned())
    }
}

impl SourceClient for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<SourceItem>, ProviderError> {
        self.searches.lock().push(criteria.clone());
        self.simulate_latency().await;

        if let Some(err) = self.scripted_failure(criteria) {
            tracing::debug!(source = %self.name, error = %err, "scripted search failure");
            return Err(err);
        }

        let items = self
            .items
            .lock()
            .iter()
            .filter(|item| {
                criteria.identities.is_empty() || criteria.identities.contains(&item.identity)
            })
            .filter(|item| criteria.since.is_none_or(|since| item.created_at >= since))
            .cloned()
            .collect();
        Ok(items)
    }

    async fn fetch_detail(&self, id: &ItemId) -> Result<SourceItem, ProviderError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }

        let mut item = self
            .items
            .lock()
            .iter()
            .find(|item| &item.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected(format!("unknown item {id}")))?;
        if let Some(body) = item.payload.as_object_mut() {
            body.insert("detail".into(), serde_json::Value::Bool(true));
        }
        Ok(item)
    }
}

impl std::fmt::Debug for ScriptedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSource")
            .field("name", &self.name)
            .field("items", &self.item_count())
            .field("searches", &self.search_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn criteria(ids: &[&str]) -> SearchCriteria {
        SearchCriteria::new("s", ids.iter().copied().map(IdentityId::new).collect())
    }

    fn source() -> ScriptedSource {
        ScriptedSource::new("test")
            .with_item("alice", "T1", serde_json::json!({"n": 1}))
            .with_item("bob", "T2", serde_json::json!({"n": 2}))
            .with_item("carol", "T3", serde_json::json!({"n": 3}))
    }

    #[tokio::test]
    async fn returns_items_for_requested_identities() {
        let source = source();
        let items = source.search(&criteria(&["alice", "carol"])).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["T1", "T3"]);
        source.assert_searched(1);
    }

    #[tokio::test]
    async fn empty_identity_list_returns_everything() {
        let source = source();
        assert_eq!(source.search(&criteria(&[])).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn since_filters_older_items() {
        let source = source();
        let later = Utc::now() + chrono::Duration::seconds(5);
        let items = source
            .search(&criteria(&["alice"]).since(later))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn max_batch_rejects_wide_searches() {
        let source = source().with_max_batch(1);
        let err = source.search(&criteria(&["alice", "bob"])).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert_eq!(source.search(&criteria(&["bob"])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let source = source()
            .fail_next(ProviderError::Throttled { retry_after: None })
            .fail_next(ProviderError::Connection("reset".into()));

        let first = source.search(&criteria(&["alice"])).await.unwrap_err();
        assert!(first.is_throttled());
        let second = source.search(&criteria(&["alice"])).await.unwrap_err();
        assert!(matches!(second, ProviderError::Connection(_)));
        assert!(source.search(&criteria(&["alice"])).await.is_ok());
        assert_eq!(source.searches().len(), 3);
    }

    #[tokio::test]
    async fn failing_identity_poisons_its_batches() {
        let source = source().fail_identity("bob", ProviderError::Unavailable("502".into()));
        assert!(source.search(&criteria(&["alice", "bob"])).await.is_err());
        assert!(source.search(&criteria(&["alice"])).await.is_ok());
    }

    #[tokio::test]
    async fn fetch_detail_marks_payload() {
        let source = source();
        let item = source.fetch_detail(&ItemId::new("T2")).await.unwrap();
        assert_eq!(item.payload["detail"], true);
        assert_eq!(item.payload["n"], 2);

        let err = source.fetch_detail(&ItemId::new("nope")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
        assert_eq!(source.detail_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied() {
        let source = source().with_delay(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        source.search(&criteria(&["alice"])).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
