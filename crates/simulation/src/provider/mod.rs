mod recording;
mod source;

pub use recording::{CapturedDelivery, FailureMode, RecordingSink};
pub use source::ScriptedSource;
