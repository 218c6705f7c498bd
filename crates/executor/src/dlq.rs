use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tollgate_core::QueuedMessage;
use tollgate_state::{KeyKind, StateError, StateKey, StateStore};

/// A message that will not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The message as it was when it was abandoned.
    pub message: QueuedMessage,
    /// Short error code of the final failure.
    pub code: String,
    /// Human-readable description of the final failure.
    pub error: String,
    /// Delivery attempts made before the message was abandoned.
    pub attempts: u32,
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        message: QueuedMessage,
        code: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            message,
            code: code.into(),
            error: error.into(),
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// Trait for dead-letter queue backends.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Append an abandoned message.
    async fn push(&self, entry: DeadLetterEntry);

    /// Remove and return every entry.
    async fn drain(&self) -> Vec<DeadLetterEntry>;

    /// Return the number of entries in the queue.
    async fn len(&self) -> usize;

    /// Return true if the queue is empty.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-memory dead-letter queue.
///
/// A plain append-only buffer guarded by a [`Mutex`]. The lock is never held
/// across `.await` points.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    /// Create a new empty dead-letter queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_executor::dlq::DeadLetterQueue;
    ///
    /// let dlq = DeadLetterQueue::new();
    /// assert!(dlq.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: DeadLetterEntry) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry);
    }

    /// Drain all entries from the queue. After this call the queue is empty.
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    async fn push(&self, entry: DeadLetterEntry) {
        DeadLetterQueue::push(self, entry);
    }

    async fn drain(&self) -> Vec<DeadLetterEntry> {
        DeadLetterQueue::drain(self)
    }

    async fn len(&self) -> usize {
        DeadLetterQueue::len(self)
    }
}

/// Dead-letter queue kept in a [`StateStore`], so entries survive restarts.
///
/// Entries are keyed by message id. Store errors are logged and the entry is
/// lost; the dead-letter path never fails the delivery loop.
pub struct StateDeadLetterSink {
    store: Arc<dyn StateStore>,
    namespace: String,
}

impl StateDeadLetterSink {
    pub fn new(store: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    async fn entries(&self) -> Result<Vec<(String, DeadLetterEntry)>, StateError> {
        let raw = self
            .store
            .scan_keys(&self.namespace, KeyKind::DeadLetter)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (id, value) in raw {
            entries.push((id, serde_json::from_str(&value)?));
        }
        entries.sort_by(|a: &(String, DeadLetterEntry), b| a.1.timestamp.cmp(&b.1.timestamp));
        Ok(entries)
    }
}

impl std::fmt::Debug for StateDeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDeadLetterSink")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DeadLetterSink for StateDeadLetterSink {
    async fn push(&self, entry: DeadLetterEntry) {
        let key = StateKey::new(
            self.namespace.clone(),
            KeyKind::DeadLetter,
            entry.message.id.as_str(),
        );
        let result = match serde_json::to_string(&entry) {
            Ok(value) => self.store.set(&key, &value, None).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(message_id = %entry.message.id, error = %e, "failed to store dead letter");
        }
    }

    async fn drain(&self) -> Vec<DeadLetterEntry> {
        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read dead letters");
                return Vec::new();
            }
        };
        let mut drained = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let key = StateKey::new(self.namespace.clone(), KeyKind::DeadLetter, id);
            if let Err(e) = self.store.delete(&key).await {
                warn!(error = %e, "failed to delete dead letter");
            }
            drained.push(entry);
        }
        drained
    }

    async fn len(&self) -> usize {
        match self
            .store
            .scan_keys(&self.namespace, KeyKind::DeadLetter)
            .await
        {
            Ok(raw) => raw.len(),
            Err(e) => {
                warn!(error = %e, "failed to count dead letters");
                0
            }
        }
    }
}
