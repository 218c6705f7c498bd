pub mod builder;
pub mod cadence;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;

pub use builder::PipelineBuilder;
pub use cadence::{CadenceConfig, CycleStats};
pub use dedup::{DedupConfig, DedupGate};
pub use error::GatewayError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{CycleReport, Pipeline, StreamReport};
pub use scheduler::{
    BatchScheduler, SchedulerConfig, StreamConfig, StreamOutcome, StreamStatus, partition,
};
pub use tollgate_executor::{DeadLetterEntry, DeadLetterQueue, DeadLetterSink};
