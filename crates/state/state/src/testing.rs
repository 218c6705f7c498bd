use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tollgate_core::{CircuitSnapshot, CircuitStatus, CooldownSnapshot, DedupRecord, ItemId, ScopeId};

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::persistence::{PersistenceStore, StatePersistence};
use crate::store::StateStore;

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new("test-ns", kind, id)
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_check_and_set_new(store).await?;
    test_check_and_set_existing(store).await?;
    test_delete(store).await?;
    test_scan_keys(store).await?;
    test_ttl_set(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Circuit, "missing");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Circuit, "set-get");
    store.set(&key, "hello", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("hello"));

    store.set(&key, "again", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("again"), "set should overwrite");
    Ok(())
}

async fn test_check_and_set_new(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Dedup, "cas-new");
    let created = store.check_and_set(&key, "v1", None).await?;
    assert!(created, "check_and_set on new key should return true");
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"));
    Ok(())
}

async fn test_check_and_set_existing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Dedup, "cas-existing");
    store.set(&key, "v1", None).await?;
    let created = store.check_and_set(&key, "v2", None).await?;
    assert!(
        !created,
        "check_and_set on existing key should return false"
    );
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");
    Ok(())
}

async fn test_delete(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Cooldown, "to-delete");
    store.set(&key, "bye", None).await?;
    let existed = store.delete(&key).await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete(&key).await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_scan_keys(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(&StateKey::new("scan-ns", KeyKind::DeadLetter, "a"), "1", None)
        .await?;
    store
        .set(&StateKey::new("scan-ns", KeyKind::DeadLetter, "b"), "2", None)
        .await?;
    store
        .set(&StateKey::new("scan-ns", KeyKind::Circuit, "c"), "3", None)
        .await?;
    store
        .set(&StateKey::new("other-ns", KeyKind::DeadLetter, "d"), "4", None)
        .await?;

    let mut found = store.scan_keys("scan-ns", KeyKind::DeadLetter).await?;
    found.sort();
    assert_eq!(
        found,
        vec![("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())],
        "scan should only return keys of the requested kind and namespace"
    );
    Ok(())
}

async fn test_ttl_set(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Circuit, "ttl-test");
    store
        .set(&key, "ephemeral", Some(Duration::from_secs(3600)))
        .await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("ephemeral"));
    Ok(())
}

/// Run the persistence conformance suite against a store.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_persistence_conformance_tests(
    store: Arc<dyn StateStore>,
) -> Result<(), StateError> {
    let persistence = StatePersistence::new(store, "persist-ns");
    test_seen_roundtrip(&persistence).await?;
    test_circuit_roundtrip(&persistence).await?;
    test_cooldown_roundtrip(&persistence).await?;
    test_prune_seen(&persistence).await?;
    Ok(())
}

async fn test_seen_roundtrip(p: &dyn PersistenceStore) -> Result<(), StateError> {
    let item = ItemId::new("T1");
    assert!(!p.has_seen(&item, &ScopeId::new("A")).await?);

    let first = p.mark_seen(&DedupRecord::new("T1", "A")).await?;
    assert!(first, "first mark_seen should insert");
    let again = p.mark_seen(&DedupRecord::new("T1", "A")).await?;
    assert!(!again, "second mark_seen should be a no-op");

    assert!(p.has_seen(&item, &ScopeId::new("A")).await?);
    assert!(
        !p.has_seen(&item, &ScopeId::new("B")).await?,
        "records are scoped"
    );
    Ok(())
}

async fn test_circuit_roundtrip(p: &dyn PersistenceStore) -> Result<(), StateError> {
    assert!(p.load_circuit_state("source").await?.is_none());
    let snap = CircuitSnapshot {
        status: CircuitStatus::Open,
        failure_count: 3,
        last_failure_time: Some(Utc::now()),
        last_trial_time: None,
    };
    p.save_circuit_state("source", &snap).await?;
    assert_eq!(p.load_circuit_state("source").await?, Some(snap));
    assert!(p.load_circuit_state("sink").await?.is_none());
    Ok(())
}

async fn test_cooldown_roundtrip(p: &dyn PersistenceStore) -> Result<(), StateError> {
    let snap = CooldownSnapshot {
        active_until: Some(Utc::now()),
        reason: "throttled".into(),
    };
    p.save_cooldown_state(&snap).await?;
    assert_eq!(p.load_cooldown_state().await?, Some(snap));
    Ok(())
}

async fn test_prune_seen(p: &dyn PersistenceStore) -> Result<(), StateError> {
    let mut old = DedupRecord::new("OLD", "P");
    old.processed_at = Utc::now() - chrono::Duration::days(30);
    p.mark_seen(&old).await?;
    p.mark_seen(&DedupRecord::new("NEW", "P")).await?;

    let removed = p
        .prune_seen(Utc::now() - chrono::Duration::days(7))
        .await?;
    assert!(removed >= 1, "old record should be pruned");
    assert!(!p.has_seen(&ItemId::new("OLD"), &ScopeId::new("P")).await?);
    assert!(p.has_seen(&ItemId::new("NEW"), &ScopeId::new("P")).await?);
    Ok(())
}
