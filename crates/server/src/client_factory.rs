use std::sync::Arc;
use std::time::Duration;

use tollgate_provider::{DynSinkClient, LogSink};
use tollgate_simulation::{FailureMode, RecordingSink, ScriptedSource};

use crate::config::{SimulationConfig, StreamServerConfig};
use crate::error::ServerError;

/// Build the in-process source, seeded with `items_per_identity` items for
/// every identity of every stream.
///
/// Streams without identities get items owned by the stream name, which
/// their identity-less searches return.
pub fn create_source(config: &SimulationConfig, streams: &[StreamServerConfig]) -> ScriptedSource {
    let mut source = ScriptedSource::new(config.source_name.as_str());
    if let Some(max) = config.max_batch {
        source = source.with_max_batch(max);
    }
    if config.latency_ms > 0 {
        source = source.with_delay(Duration::from_millis(config.latency_ms));
    }

    for stream in streams {
        let owners: Vec<&str> = if stream.identities.is_empty() {
            vec![stream.name.as_str()]
        } else {
            stream.identities.iter().map(String::as_str).collect()
        };
        for owner in owners {
            for n in 1..=config.items_per_identity {
                source = source.with_item(
                    owner,
                    format!("{}-{owner}-{n}", stream.name),
                    serde_json::json!({
                        "stream": stream.name,
                        "identity": owner,
                        "title": format!("item {n} from {owner}"),
                    }),
                );
            }
        }
    }
    source
}

/// Build the sink named by `config.sink`.
pub fn create_sink(config: &SimulationConfig) -> Result<Arc<dyn DynSinkClient>, ServerError> {
    match config.sink.as_str() {
        "log" => Ok(Arc::new(LogSink::new(config.sink_name.as_str()))),
        "recording" => {
            if !(0.0..=1.0).contains(&config.sink_failure_rate) {
                return Err(ServerError::Config(format!(
                    "sink_failure_rate must be within [0, 1], got {}",
                    config.sink_failure_rate
                )));
            }
            let mut sink = RecordingSink::new(config.sink_name.as_str());
            if config.sink_failure_rate > 0.0 {
                sink = sink.with_failure_mode(FailureMode::Probabilistic(config.sink_failure_rate));
            }
            Ok(Arc::new(sink))
        }
        other => Err(ServerError::Config(format!("unknown sink: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams() -> Vec<StreamServerConfig> {
        toml::from_str::<crate::config::TollgateConfig>(
            r##"
            [[streams]]
            name = "issues"
            destination = "#alerts"
            identities = ["alice", "bob"]

            [[streams]]
            name = "all"
            destination = "#all"
            "##,
        )
        .unwrap()
        .streams
    }

    #[test]
    fn seeds_items_per_identity() {
        let config = SimulationConfig {
            items_per_identity: 2,
            ..SimulationConfig::default()
        };
        let source = create_source(&config, &streams());
        // Two identities plus the identity-less stream, two items each.
        assert_eq!(source.item_count(), 6);
    }

    #[test]
    fn builds_known_sinks() {
        let log = create_sink(&SimulationConfig::default()).unwrap();
        assert_eq!(log.name(), "sink");

        let recording = create_sink(&SimulationConfig {
            sink: "recording".into(),
            sink_failure_rate: 0.5,
            ..SimulationConfig::default()
        })
        .unwrap();
        assert_eq!(recording.name(), "sink");
    }

    #[test]
    fn rejects_bad_sink_settings() {
        let unknown = create_sink(&SimulationConfig {
            sink: "smtp".into(),
            ..SimulationConfig::default()
        });
        assert!(unknown.err().unwrap().to_string().contains("unknown sink"));

        let rate = create_sink(&SimulationConfig {
            sink: "recording".into(),
            sink_failure_rate: 1.5,
            ..SimulationConfig::default()
        });
        assert!(rate.err().unwrap().to_string().contains("sink_failure_rate"));
    }
}
