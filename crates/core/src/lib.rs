pub mod batch;
pub mod circuit_breaker;
pub mod cooldown;
pub mod dedup;
pub mod item;
pub mod message;
pub mod metrics;
pub mod types;

pub use batch::Batch;
pub use circuit_breaker::{CircuitSnapshot, CircuitStatus};
pub use cooldown::CooldownSnapshot;
pub use dedup::DedupRecord;
pub use item::{SearchCriteria, SinkAck, SourceItem};
pub use message::{ItemRef, QueuedMessage};
pub use metrics::{MetricsRecorder, MetricsSink, NoopMetrics, TimingStats};
pub use types::{IdentityId, ItemId, MessageId, Priority, ScopeId, StreamName};
