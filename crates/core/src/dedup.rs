use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ItemId, ScopeId};

/// Record that an item was processed within a scope.
///
/// Unique per `(item_id, scope_id)`. Records are written once and never
/// mutated; they may be pruned by age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub item_id: ItemId,
    pub scope_id: ScopeId,
    pub processed_at: DateTime<Utc>,
}

impl DedupRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>, scope_id: impl Into<ScopeId>) -> Self {
        Self {
            item_id: item_id.into(),
            scope_id: scope_id.into(),
            processed_at: Utc::now(),
        }
    }

    /// Canonical key for the record: `<scope length>:scope:item`.
    ///
    /// Ids may contain `:`, so the scope is length-prefixed to keep
    /// `("c", "a:b")` and `("b:c", "a")` apart.
    #[must_use]
    pub fn key(item_id: &ItemId, scope_id: &ScopeId) -> String {
        format!("{}:{scope_id}:{item_id}", scope_id.as_str().len())
    }
}
