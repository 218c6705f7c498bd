use serde::Deserialize;

/// Settings for the in-process source and sink the server runs against.
///
/// # Example
///
/// ```toml
/// [simulation]
/// items_per_identity = 5
/// max_batch = 1
/// sink = "recording"
/// sink_failure_rate = 0.1
/// ```
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_sink_name")]
    pub sink_name: String,
    /// `"log"` acknowledges every delivery; `"recording"` keeps them in
    /// memory and can fail on demand.
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Items seeded for each identity of each stream.
    #[serde(default = "default_items_per_identity")]
    pub items_per_identity: u32,
    /// Widest search the source accepts; wider batches fall back to
    /// per-identity calls.
    pub max_batch: Option<usize>,
    /// Latency added to every source call.
    #[serde(default)]
    pub latency_ms: u64,
    /// Probability that a recording sink rejects a delivery as unavailable.
    #[serde(default)]
    pub sink_failure_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            source_name: default_source_name(),
            sink_name: default_sink_name(),
            sink: default_sink(),
            items_per_identity: default_items_per_identity(),
            max_batch: None,
            latency_ms: 0,
            sink_failure_rate: 0.0,
        }
    }
}

fn default_source_name() -> String {
    "source".to_owned()
}

fn default_sink_name() -> String {
    "sink".to_owned()
}

fn default_sink() -> String {
    "log".to_owned()
}

fn default_items_per_identity() -> u32 {
    3
}
