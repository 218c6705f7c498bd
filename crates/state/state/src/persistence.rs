use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::{CircuitSnapshot, CooldownSnapshot, DedupRecord, ItemId, ScopeId};
use tracing::debug;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::store::StateStore;

const COOLDOWN_ID: &str = "global";

/// Restart-recovery and idempotency storage used by the executor and gateway.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Whether `(item_id, scope_id)` has already been processed.
    async fn has_seen(&self, item_id: &ItemId, scope_id: &ScopeId) -> Result<bool, StateError>;

    /// Record a processed item. Returns `false` if the record already existed,
    /// in which case the stored record is left untouched.
    async fn mark_seen(&self, record: &DedupRecord) -> Result<bool, StateError>;

    async fn load_circuit_state(&self, key: &str) -> Result<Option<CircuitSnapshot>, StateError>;

    async fn save_circuit_state(
        &self,
        key: &str,
        state: &CircuitSnapshot,
    ) -> Result<(), StateError>;

    async fn load_cooldown_state(&self) -> Result<Option<CooldownSnapshot>, StateError>;

    async fn save_cooldown_state(&self, state: &CooldownSnapshot) -> Result<(), StateError>;

    /// Remove dedup records processed before `older_than`. Returns how many
    /// were removed.
    async fn prune_seen(&self, older_than: DateTime<Utc>) -> Result<usize, StateError>;
}

/// [`PersistenceStore`] over any [`StateStore`], encoding values as JSON.
#[derive(Clone)]
pub struct StatePersistence {
    store: Arc<dyn StateStore>,
    namespace: String,
}

impl StatePersistence {
    pub fn new(store: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// The underlying key-value store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn key(&self, kind: KeyKind, id: impl Into<String>) -> StateKey {
        StateKey::new(self.namespace.clone(), kind, id)
    }
}

impl std::fmt::Debug for StatePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersistence")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistenceStore for StatePersistence {
    async fn has_seen(&self, item_id: &ItemId, scope_id: &ScopeId) -> Result<bool, StateError> {
        let key = self.key(KeyKind::Dedup, DedupRecord::key(item_id, scope_id));
        Ok(self.store.get(&key).await?.is_some())
    }

    async fn mark_seen(&self, record: &DedupRecord) -> Result<bool, StateError> {
        let key = self.key(
            KeyKind::Dedup,
            DedupRecord::key(&record.item_id, &record.scope_id),
        );
        let value = serde_json::to_string(record)?;
        self.store.check_and_set(&key, &value, None).await
    }

    async fn load_circuit_state(&self, key: &str) -> Result<Option<CircuitSnapshot>, StateError> {
        let raw = self.store.get(&self.key(KeyKind::Circuit, key)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StateError::from))
            .transpose()
    }

    async fn save_circuit_state(
        &self,
        key: &str,
        state: &CircuitSnapshot,
    ) -> Result<(), StateError> {
        let value = serde_json::to_string(state)?;
        self.store
            .set(&self.key(KeyKind::Circuit, key), &value, None)
            .await
    }

    async fn load_cooldown_state(&self) -> Result<Option<CooldownSnapshot>, StateError> {
        let raw = self
            .store
            .get(&self.key(KeyKind::Cooldown, COOLDOWN_ID))
            .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StateError::from))
            .transpose()
    }

    async fn save_cooldown_state(&self, state: &CooldownSnapshot) -> Result<(), StateError> {
        let value = serde_json::to_string(state)?;
        self.store
            .set(&self.key(KeyKind::Cooldown, COOLDOWN_ID), &value, None)
            .await
    }

    async fn prune_seen(&self, older_than: DateTime<Utc>) -> Result<usize, StateError> {
        let entries = self
            .store
            .scan_keys(&self.namespace, KeyKind::Dedup)
            .await?;

        let mut removed = 0;
        for (id, value) in entries {
            let record: DedupRecord = match serde_json::from_str(&value) {
                Ok(r) => r,
                Err(e) => {
                    debug!(id = %id, error = %e, "skipping unreadable dedup record");
                    continue;
                }
            };
            if record.processed_at < older_than
                && self.store.delete(&self.key(KeyKind::Dedup, id)).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
