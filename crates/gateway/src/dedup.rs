use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use tollgate_core::{DedupRecord, ItemId, MetricsSink, NoopMetrics, ScopeId};
use tollgate_state::PersistenceStore;

use crate::error::GatewayError;

/// Retention settings for dedup records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// Records older than this are pruned.
    pub retention: Duration,
    /// Minimum time between two prune passes.
    pub prune_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
            prune_interval: Duration::from_secs(3600),
        }
    }
}

/// Idempotency boundary between the source and the delivery queue.
///
/// Persistent records say an item was delivered. In-memory claims cover the
/// window between enqueue and the delivery outcome, so overlapping cycles do
/// not queue the same item twice. A claim is turned into a record by
/// [`mark_seen`](Self::mark_seen) or dropped by [`release`](Self::release).
pub struct DedupGate {
    store: Arc<dyn PersistenceStore>,
    claims: Mutex<HashSet<String>>,
    metrics: Arc<dyn MetricsSink>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            claims: Mutex::new(HashSet::new()),
            metrics: Arc::new(NoopMetrics),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether the item was already delivered within `scope_id`.
    pub async fn seen(&self, item_id: &ItemId, scope_id: &ScopeId) -> Result<bool, GatewayError> {
        Ok(self.store.has_seen(item_id, scope_id).await?)
    }

    /// Record the item as delivered. Idempotent; returns `false` if it was
    /// already recorded. Clears any claim on the item.
    pub async fn mark_seen(
        &self,
        item_id: &ItemId,
        scope_id: &ScopeId,
    ) -> Result<bool, GatewayError> {
        let inserted = self
            .store
            .mark_seen(&DedupRecord::new(item_id.clone(), scope_id.clone()))
            .await?;
        self.claims.lock().remove(&DedupRecord::key(item_id, scope_id));
        Ok(inserted)
    }

    /// Claim an item for delivery.
    ///
    /// Returns `false` if the item was already delivered or is claimed by an
    /// earlier cycle.
    pub async fn try_claim(
        &self,
        item_id: &ItemId,
        scope_id: &ScopeId,
    ) -> Result<bool, GatewayError> {
        let key = DedupRecord::key(item_id, scope_id);
        let in_flight = self.claims.lock().contains(&key);
        if in_flight || self.seen(item_id, scope_id).await? {
            debug!(%item_id, %scope_id, "duplicate item");
            self.metrics.increment("dedup.duplicates");
            return Ok(false);
        }
        let claimed = self.claims.lock().insert(key);
        if !claimed {
            self.metrics.increment("dedup.duplicates");
        }
        Ok(claimed)
    }

    /// Drop a claim without recording the item, so a later cycle may pick it
    /// up again.
    pub fn release(&self, item_id: &ItemId, scope_id: &ScopeId) -> bool {
        self.claims
            .lock()
            .remove(&DedupRecord::key(item_id, scope_id))
    }

    /// Items currently claimed and awaiting a delivery outcome.
    pub fn in_flight(&self) -> usize {
        self.claims.lock().len()
    }

    /// Remove records older than `max_age`.
    pub async fn prune(&self, max_age: Duration) -> Result<usize, GatewayError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| GatewayError::Configuration(format!("invalid retention: {e}")))?;
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .ok_or_else(|| GatewayError::Configuration("retention out of range".into()))?;
        let removed = self.store.prune_seen(cutoff).await?;
        if removed > 0 {
            info!(removed, "pruned dedup records");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for DedupGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupGate")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::MetricsRecorder;
    use tollgate_state::{StatePersistence, StateStore};
    use tollgate_state_memory::MemoryStateStore;

    use super::*;

    fn gate() -> DedupGate {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        DedupGate::new(Arc::new(StatePersistence::new(store, "test")))
    }

    fn ids(item: &str, scope: &str) -> (ItemId, ScopeId) {
        (ItemId::new(item), ScopeId::new(scope))
    }

    #[tokio::test]
    async fn seen_is_scoped() {
        let gate = gate();
        let (t1, a) = ids("T1", "A");
        let b = ScopeId::new("B");

        assert!(!gate.seen(&t1, &a).await.unwrap());
        assert!(gate.mark_seen(&t1, &a).await.unwrap());
        assert!(gate.seen(&t1, &a).await.unwrap());
        assert!(!gate.seen(&t1, &b).await.unwrap());
    }

    #[tokio::test]
    async fn colon_ids_stay_distinct() {
        let gate = gate();
        let (c, ab) = ids("c", "a:b");
        let (bc, a) = ids("b:c", "a");

        assert!(gate.mark_seen(&c, &ab).await.unwrap());
        assert!(!gate.seen(&bc, &a).await.unwrap());
        assert!(gate.try_claim(&bc, &a).await.unwrap());
        assert!(gate.mark_seen(&bc, &a).await.unwrap());
        assert!(gate.seen(&c, &ab).await.unwrap());
    }

    #[tokio::test]
    async fn mark_seen_is_idempotent() {
        let gate = gate();
        let (t1, a) = ids("T1", "A");
        assert!(gate.mark_seen(&t1, &a).await.unwrap());
        assert!(!gate.mark_seen(&t1, &a).await.unwrap());
        assert!(gate.seen(&t1, &a).await.unwrap());
    }

    #[tokio::test]
    async fn claims_block_until_released_or_recorded() {
        let metrics = Arc::new(MetricsRecorder::new());
        let gate = gate().with_metrics(metrics.clone());
        let (t1, a) = ids("T1", "A");

        assert!(gate.try_claim(&t1, &a).await.unwrap());
        assert!(!gate.try_claim(&t1, &a).await.unwrap());
        assert_eq!(gate.in_flight(), 1);

        assert!(gate.release(&t1, &a));
        assert!(gate.try_claim(&t1, &a).await.unwrap());

        gate.mark_seen(&t1, &a).await.unwrap();
        assert_eq!(gate.in_flight(), 0);
        assert!(!gate.try_claim(&t1, &a).await.unwrap());
        assert_eq!(metrics.counter("dedup.duplicates"), 2);
    }

    #[tokio::test]
    async fn prune_keeps_recent_records() {
        let gate = gate();
        let (t1, a) = ids("T1", "A");
        gate.mark_seen(&t1, &a).await.unwrap();

        assert_eq!(gate.prune(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(gate.seen(&t1, &a).await.unwrap());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(gate.prune(Duration::ZERO).await.unwrap(), 1);
        assert!(!gate.seen(&t1, &a).await.unwrap());
    }
}
