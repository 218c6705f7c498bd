use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tollgate_core::{MetricsSink, NoopMetrics};
use tollgate_executor::{
    AdmissionConfig, AdmissionQueue, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry, CooldownConfig, CooldownCoordinator, DeadLetterQueue, DeadLetterSink,
    DeliveryConfig, DeliveryQueue, StateDeadLetterSink,
};
use tollgate_provider::{DynSinkClient, DynSourceClient};
use tollgate_state::{PersistenceStore, StatePersistence, StateStore};
use tollgate_state_memory::MemoryStateStore;

use crate::cadence::CadenceConfig;
use crate::dedup::{DedupConfig, DedupGate};
use crate::error::GatewayError;
use crate::metrics::PipelineMetrics;
use crate::pipeline::{Pipeline, PipelineObserver};
use crate::scheduler::{BatchScheduler, SchedulerConfig, StreamConfig};

/// Fluent builder for constructing a [`Pipeline`].
///
/// A source, a sink and at least one stream are required. Everything else
/// has defaults: an in-memory state store, the `tollgate` namespace, default
/// component configs, and an in-memory dead-letter queue.
pub struct PipelineBuilder {
    source: Option<Arc<dyn DynSourceClient>>,
    sink: Option<Arc<dyn DynSinkClient>>,
    state: Option<Arc<dyn StateStore>>,
    namespace: String,
    admission: AdmissionConfig,
    delivery: DeliveryConfig,
    circuit_breaker: CircuitBreakerConfig,
    cooldown: CooldownConfig,
    scheduler: SchedulerConfig,
    cadence: CadenceConfig,
    dedup: DedupConfig,
    streams: Vec<StreamConfig>,
    dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
    persistent_dead_letters: bool,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            sink: None,
            state: None,
            namespace: "tollgate".to_owned(),
            admission: AdmissionConfig::default(),
            delivery: DeliveryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cooldown: CooldownConfig::default(),
            scheduler: SchedulerConfig::default(),
            cadence: CadenceConfig::default(),
            dedup: DedupConfig::default(),
            streams: Vec::new(),
            dead_letter_sink: None,
            persistent_dead_letters: false,
            metrics: None,
        }
    }

    #[must_use]
    pub fn source(mut self, source: Arc<dyn DynSourceClient>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DynSinkClient>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Backing store for dedup records and breaker/cooldown snapshots.
    #[must_use]
    pub fn state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Prefix for every state key this pipeline writes.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn admission_config(mut self, config: AdmissionConfig) -> Self {
        self.admission = config;
        self
    }

    #[must_use]
    pub fn delivery_config(mut self, config: DeliveryConfig) -> Self {
        self.delivery = config;
        self
    }

    /// Breaker settings, applied to both the source and the sink breaker.
    #[must_use]
    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    #[must_use]
    pub fn cooldown_config(mut self, config: CooldownConfig) -> Self {
        self.cooldown = config;
        self
    }

    #[must_use]
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    #[must_use]
    pub fn cadence_config(mut self, config: CadenceConfig) -> Self {
        self.cadence = config;
        self
    }

    #[must_use]
    pub fn dedup_config(mut self, config: DedupConfig) -> Self {
        self.dedup = config;
        self
    }

    #[must_use]
    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    #[must_use]
    pub fn streams(mut self, streams: impl IntoIterator<Item = StreamConfig>) -> Self {
        self.streams.extend(streams);
        self
    }

    /// Use a custom dead-letter sink. Takes precedence over
    /// [`persistent_dead_letters`](Self::persistent_dead_letters).
    #[must_use]
    pub fn dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter_sink = Some(sink);
        self
    }

    /// Keep dead letters in the state store instead of memory.
    #[must_use]
    pub fn persistent_dead_letters(mut self, enabled: bool) -> Self {
        self.persistent_dead_letters = enabled;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume the builder and wire up a [`Pipeline`].
    ///
    /// Returns a [`GatewayError::Configuration`] if the source, the sink or
    /// the streams are missing, or if any component config is invalid.
    pub fn build(self) -> Result<Pipeline, GatewayError> {
        let source = self
            .source
            .ok_or_else(|| GatewayError::Configuration("source client is required".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| GatewayError::Configuration("sink client is required".into()))?;
        validate_streams(&self.streams)?;

        let invalid = |section: &str, reason: String| {
            GatewayError::Configuration(format!("invalid {section} config: {reason}"))
        };
        self.admission
            .validate()
            .map_err(|e| invalid("admission", e))?;
        self.delivery.validate().map_err(|e| invalid("delivery", e))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| invalid("circuit_breaker", e))?;
        self.cooldown.validate().map_err(|e| invalid("cooldown", e))?;
        self.scheduler
            .validate()
            .map_err(|e| invalid("scheduler", e))?;
        self.cadence.validate().map_err(|e| invalid("cadence", e))?;

        let state: Arc<dyn StateStore> = self
            .state
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));
        let persistence: Arc<dyn PersistenceStore> = Arc::new(StatePersistence::new(
            Arc::clone(&state),
            self.namespace.clone(),
        ));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));

        let cooldown = Arc::new(
            CooldownCoordinator::new(self.cooldown)
                .with_persistence(Arc::clone(&persistence))
                .with_metrics(Arc::clone(&metrics)),
        );

        let breaker = |dependency: String| {
            CircuitBreaker::new(dependency, self.circuit_breaker.clone())
                .with_cooldown(Arc::clone(&cooldown))
                .with_persistence(Arc::clone(&persistence))
                .with_metrics(Arc::clone(&metrics))
        };
        let mut breakers = CircuitBreakerRegistry::new();
        let source_breaker = breakers.register(breaker(format!("source:{}", source.name())));
        let sink_breaker = breakers.register(breaker(format!("sink:{}", sink.name())));

        let admission = Arc::new(
            AdmissionQueue::new(format!("source:{}", source.name()), self.admission)?
                .with_cooldown(Arc::clone(&cooldown))
                .with_metrics(Arc::clone(&metrics)),
        );

        let dedup = Arc::new(DedupGate::new(persistence).with_metrics(Arc::clone(&metrics)));
        let pipeline_metrics = Arc::new(PipelineMetrics::default());

        let dead_letters: Arc<dyn DeadLetterSink> = match self.dead_letter_sink {
            Some(sink) => sink,
            None if self.persistent_dead_letters => Arc::new(StateDeadLetterSink::new(
                Arc::clone(&state),
                self.namespace.clone(),
            )),
            None => Arc::new(DeadLetterQueue::new()),
        };

        let delivery = DeliveryQueue::new(self.delivery, sink, sink_breaker)?
            .with_cooldown(Arc::clone(&cooldown))
            .with_dead_letter_sink(dead_letters)
            .with_observer(Arc::new(PipelineObserver {
                dedup: Arc::clone(&dedup),
                metrics: Arc::clone(&pipeline_metrics),
            }))
            .with_metrics(Arc::clone(&metrics));

        let scheduler = BatchScheduler::new(
            self.scheduler,
            source,
            Arc::clone(&admission),
            source_breaker,
            Arc::clone(&cooldown),
        )
        .with_metrics(metrics);

        Ok(Pipeline {
            streams: self.streams,
            scheduler,
            admission,
            delivery,
            dedup,
            cooldown,
            breakers,
            cadence: self.cadence,
            dedup_config: self.dedup,
            metrics: pipeline_metrics,
            last_prune: Mutex::new(None),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_streams(streams: &[StreamConfig]) -> Result<(), GatewayError> {
    if streams.is_empty() {
        return Err(GatewayError::Configuration(
            "at least one stream is required".into(),
        ));
    }
    let mut names = HashSet::new();
    for stream in streams {
        if !names.insert(stream.name.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "duplicate stream name: {}",
                stream.name
            )));
        }
        if stream.destination.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "stream {} has no destination",
                stream.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tollgate_simulation::{RecordingSink, ScriptedSource};

    use super::*;

    fn clients() -> PipelineBuilder {
        PipelineBuilder::new()
            .source(Arc::new(ScriptedSource::new("tickets")))
            .sink(Arc::new(RecordingSink::new("chat")))
    }

    fn stream(name: &str) -> StreamConfig {
        StreamConfig::new(name, "#alerts").with_identities(["alice", "bob"])
    }

    fn config_error(result: Result<Pipeline, GatewayError>) -> String {
        match result {
            Err(GatewayError::Configuration(msg)) => msg,
            Err(other) => panic!("expected configuration error, got {other}"),
            Ok(_) => panic!("expected configuration error, got a pipeline"),
        }
    }

    #[test]
    fn build_missing_source_returns_error() {
        let result = PipelineBuilder::new()
            .sink(Arc::new(RecordingSink::new("chat")))
            .stream(stream("s"))
            .build();
        assert!(config_error(result).contains("source client is required"));
    }

    #[test]
    fn build_missing_sink_returns_error() {
        let result = PipelineBuilder::new()
            .source(Arc::new(ScriptedSource::new("tickets")))
            .stream(stream("s"))
            .build();
        assert!(config_error(result).contains("sink client is required"));
    }

    #[test]
    fn build_without_streams_returns_error() {
        assert!(config_error(clients().build()).contains("at least one stream"));
    }

    #[test]
    fn build_rejects_duplicate_streams() {
        let result = clients().stream(stream("s")).stream(stream("s")).build();
        assert!(config_error(result).contains("duplicate stream name"));
    }

    #[test]
    fn build_rejects_invalid_component_config() {
        let result = clients()
            .stream(stream("s"))
            .scheduler_config(SchedulerConfig {
                batch_size: 0,
                ..SchedulerConfig::default()
            })
            .build();
        assert!(config_error(result).contains("invalid scheduler config"));

        let result = clients()
            .stream(stream("s"))
            .cadence_config(CadenceConfig {
                min_interval: Duration::ZERO,
                ..CadenceConfig::default()
            })
            .build();
        assert!(config_error(result).contains("invalid cadence config"));
    }

    #[tokio::test]
    async fn build_registers_one_breaker_per_dependency() {
        let pipeline = clients().stream(stream("s")).build().unwrap();
        assert_eq!(
            pipeline.breakers().dependencies(),
            ["sink:chat", "source:tickets"]
        );
        assert_eq!(pipeline.streams().len(), 1);
    }

    #[tokio::test]
    async fn persistent_dead_letters_use_state_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let pipeline = clients()
            .stream(stream("s"))
            .state(Arc::clone(&store))
            .persistent_dead_letters(true)
            .build()
            .unwrap();
        assert!(pipeline.dead_letters().is_empty().await);
    }
}
