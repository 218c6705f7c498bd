use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ItemId, MessageId, Priority, ScopeId};

/// Links a queued message back to the source item it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: ItemId,
    pub scope_id: ScopeId,
}

impl ItemRef {
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>, scope_id: impl Into<ScopeId>) -> Self {
        Self {
            item_id: item_id.into(),
            scope_id: scope_id.into(),
        }
    }
}

/// A message waiting in (or moving through) the delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Unique message identifier.
    pub id: MessageId,

    /// Body handed to the sink.
    pub payload: serde_json::Value,

    /// Sink-side destination (channel, webhook, chat id).
    pub destination: String,

    /// Dequeue priority. Higher first.
    pub priority: Priority,

    /// Number of retries consumed so far. Never exceeds the queue's `max_retries`.
    pub retry_count: u32,

    /// When the first delivery attempt happened.
    pub first_attempt: Option<DateTime<Utc>>,

    /// When the most recent delivery attempt happened.
    pub last_attempt: Option<DateTime<Utc>>,

    /// Earliest time the next attempt may run.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Source item carried by this message, if any.
    #[serde(default)]
    pub item: Option<ItemRef>,

    /// When the message was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Create a new message with a generated id.
    #[must_use]
    pub fn new(payload: serde_json::Value, destination: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            payload,
            destination: destination.into(),
            priority: Priority::NORMAL,
            retry_count: 0,
            first_attempt: None,
            last_attempt: None,
            next_attempt_at: None,
            item: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Attach the source item this message carries.
    #[must_use]
    pub fn with_item(mut self, item: ItemRef) -> Self {
        self.item = Some(item);
        self
    }

    /// Record the start of a delivery attempt.
    pub fn mark_attempt(&mut self, now: DateTime<Utc>) {
        if self.first_attempt.is_none() {
            self.first_attempt = Some(now);
        }
        self.last_attempt = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_defaults() {
        let msg = QueuedMessage::new(serde_json::json!({"text": "hi"}), "chan-1");
        assert_eq!(msg.destination, "chan-1");
        assert_eq!(msg.priority, Priority::NORMAL);
        assert_eq!(msg.retry_count, 0);
        assert!(msg.first_attempt.is_none());
        assert!(msg.item.is_none());
    }

    #[test]
    fn mark_attempt_keeps_first_attempt() {
        let mut msg = QueuedMessage::new(serde_json::Value::Null, "d");
        let t1 = Utc::now();
        msg.mark_attempt(t1);
        let t2 = t1 + chrono::Duration::seconds(5);
        msg.mark_attempt(t2);
        assert_eq!(msg.first_attempt, Some(t1));
        assert_eq!(msg.last_attempt, Some(t2));
    }

    #[test]
    fn message_roundtrips_with_item_ref() {
        let msg = QueuedMessage::new(serde_json::Value::Null, "d").with_item(ItemRef::new("T1", "A"));
        let json = serde_json::to_string(&msg).unwrap();
        let back: QueuedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.item, Some(ItemRef::new("T1", "A")));
    }
}
