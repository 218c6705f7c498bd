use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{IdentityId, ItemId, StreamName};

/// An item returned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Source-assigned item identifier.
    pub id: ItemId,

    /// The monitored identity that produced the item.
    pub identity: IdentityId,

    /// Opaque item body, forwarded to the sink as-is.
    pub payload: serde_json::Value,

    /// When the source says the item was created.
    pub created_at: DateTime<Utc>,
}

impl SourceItem {
    /// Create a new item stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<ItemId>,
        identity: impl Into<IdentityId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Criteria passed to the source for one search call.
///
/// The query itself (`params`) is built by the caller; this layer only adds
/// the identities of the current batch and the poll window start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// The logical stream this search belongs to.
    pub stream: StreamName,

    /// Identities covered by this call, in batch order.
    pub identities: Vec<IdentityId>,

    /// Only return items created at or after this instant.
    pub since: Option<DateTime<Utc>>,

    /// Stream-specific query parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl SearchCriteria {
    /// Build criteria for a set of identities with no lower time bound.
    #[must_use]
    pub fn new(stream: impl Into<StreamName>, identities: Vec<IdentityId>) -> Self {
        Self {
            stream: stream.into(),
            identities,
            since: None,
            params: serde_json::Value::Null,
        }
    }

    /// Set the poll window start.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Set stream-specific query parameters.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Acknowledgement returned by the sink after a successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkAck {
    /// Sink-assigned receipt, if any.
    pub receipt: Option<String>,

    /// Raw sink response body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl SinkAck {
    /// An acknowledgement carrying only a receipt.
    #[must_use]
    pub fn receipt(receipt: impl Into<String>) -> Self {
        Self {
            receipt: Some(receipt.into()),
            body: serde_json::Value::Null,
        }
    }

    /// An acknowledgement with no receipt.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            receipt: None,
            body: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_builder() {
        let since = Utc::now();
        let criteria = SearchCriteria::new("rust", vec![IdentityId::new("a")])
            .since(since)
            .with_params(serde_json::json!({"q": "tokio"}));
        assert_eq!(criteria.stream.as_str(), "rust");
        assert_eq!(criteria.since, Some(since));
        assert_eq!(criteria.params["q"], "tokio");
    }

    #[test]
    fn sink_ack_constructors() {
        assert_eq!(SinkAck::receipt("r-1").receipt.as_deref(), Some("r-1"));
        assert!(SinkAck::empty().receipt.is_none());
    }
}
