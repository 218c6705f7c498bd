use std::sync::Arc;

use tollgate_core::MetricsSink;
use tollgate_gateway::{Pipeline, PipelineBuilder};
use tracing::info;

use crate::client_factory::{create_sink, create_source};
use crate::config::TollgateConfig;
use crate::error::ServerError;
use crate::state_factory::create_state;

/// Wire a [`Pipeline`] from the server configuration.
pub fn create_pipeline(
    config: &TollgateConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Pipeline, ServerError> {
    let state = create_state(&config.state)?;
    let source = create_source(&config.simulation, &config.streams);
    let sink = create_sink(&config.simulation)?;
    info!(
        source = %config.simulation.source_name,
        seeded_items = source.item_count(),
        sink = %config.simulation.sink,
        streams = config.streams.len(),
        "clients created"
    );

    let pipeline = PipelineBuilder::new()
        .source(Arc::new(source))
        .sink(sink)
        .state(state)
        .namespace(config.state.namespace.as_str())
        .admission_config(config.admission.to_config())
        .delivery_config(config.delivery.to_config())
        .persistent_dead_letters(config.delivery.persistent_dead_letters)
        .circuit_breaker_config(config.circuit_breaker.to_config())
        .cooldown_config(config.cooldown.to_config())
        .scheduler_config(config.scheduler.to_config())
        .cadence_config(config.cadence.to_config())
        .dedup_config(config.dedup.to_config())
        .streams(config.streams.iter().map(|s| s.to_stream()))
        .metrics(metrics)
        .build()?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use tollgate_core::{MetricsRecorder, NoopMetrics};
    use tollgate_gateway::GatewayError;

    use super::*;

    fn config(toml: &str) -> TollgateConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn config_without_streams_is_rejected() {
        let err = create_pipeline(&config(""), Arc::new(NoopMetrics))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ServerError::Gateway(GatewayError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_a_cycle_against_simulated_clients() {
        let config = config(
            r##"
            [admission]
            rate_per_second = 10.0

            [delivery]
            max_per_window = 100

            [simulation]
            items_per_identity = 2
            max_batch = 1

            [[streams]]
            name = "issues"
            destination = "#alerts"
            identities = ["alice", "bob"]
            "##,
        );
        let recorder = Arc::new(MetricsRecorder::new());
        let pipeline = create_pipeline(&config, recorder.clone()).unwrap();

        let reports = pipeline.run_cycles(1).await.unwrap();
        pipeline.wait_delivered().await;
        pipeline.stop().await;

        assert_eq!(reports[0].enqueued, 4);
        assert_eq!(reports[0].streams[0].fallback_calls, 2);
        assert_eq!(pipeline.metrics().snapshot().delivered, 4);
        assert_eq!(recorder.counter("delivery.delivered"), 4);
        assert_eq!(recorder.counter("scheduler.fallback_calls"), 2);
    }
}
