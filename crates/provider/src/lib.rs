pub mod error;
pub mod log;
pub mod sink;
pub mod source;

pub use error::{ErrorClass, ProviderError};
pub use log::LogSink;
pub use sink::{DynSinkClient, SinkClient};
pub use source::{DynSourceClient, SourceClient};
