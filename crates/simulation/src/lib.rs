//! Tollgate simulation support
//!
//! In-memory stand-ins for the two rate-limited systems a pipeline talks
//! to, for tests and local runs:
//!
//! - [`ScriptedSource`] serves a fixed item set, enforces an optional batch
//!   width and replays queued failures.
//! - [`RecordingSink`] captures every delivery attempt and fails on demand.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tollgate_provider::{DynSinkClient, DynSourceClient, ProviderError};
//! use tollgate_simulation::prelude::*;
//!
//! let source: Arc<dyn DynSourceClient> = Arc::new(
//!     ScriptedSource::new("tickets")
//!         .with_item("alice", "T1", serde_json::json!({}))
//!         .fail_next(ProviderError::Throttled { retry_after: None }),
//! );
//! let sink: Arc<dyn DynSinkClient> =
//!     Arc::new(RecordingSink::new("chat").with_failure_mode(FailureMode::FirstN(1)));
//! assert_eq!(source.name(), "tickets");
//! assert_eq!(sink.name(), "chat");
//! ```

pub mod provider;

pub use provider::{CapturedDelivery, FailureMode, RecordingSink, ScriptedSource};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::provider::{CapturedDelivery, FailureMode, RecordingSink, ScriptedSource};
}
