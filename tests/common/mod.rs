//! Shared fixtures for the integration tests: an in-memory pipeline wired to
//! mock services and a collecting event sink.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chunkforge::config::PipelineConfig;
use chunkforge::embed::MockEmbeddingProvider;
use chunkforge::events::{CollectorSink, EventBus, PipelineEvent};
use chunkforge::orchestrator::Orchestrator;
use chunkforge::store::MemoryStore;
use chunkforge::transcribe::MockTranscriber;

pub struct TestPipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub embedder: Arc<MockEmbeddingProvider>,
    pub transcriber: Arc<MockTranscriber>,
    pub events: CollectorSink,
    bus: EventBus,
}

impl TestPipeline {
    pub fn with_transcript(config: PipelineConfig, transcript: &str) -> Self {
        Self::build(config, MockTranscriber::new(transcript))
    }

    pub fn new(config: PipelineConfig) -> Self {
        Self::build(config, MockTranscriber::new("segment transcript"))
    }

    fn build(config: PipelineConfig, transcriber: MockTranscriber) -> Self {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(MockEmbeddingProvider::default());
        let transcriber = Arc::new(transcriber);
        let sink = CollectorSink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen();

        let orchestrator = Orchestrator::new(
            config,
            store.clone(),
            store.clone(),
            embedder.clone(),
            transcriber.clone(),
        )
        .expect("orchestrator construction")
        .with_event_sender(bus.sender());

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            embedder,
            transcriber,
            events: sink,
            bus,
        }
    }

    /// Drain the event bus and return everything collected so far.
    pub async fn collected_events(&self) -> Vec<PipelineEvent> {
        self.bus.stop().await;
        self.events.snapshot()
    }
}

/// Fast test configuration: tiny backoff, no jitter, deterministic timing.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::from_env().with_backoff(Duration::from_millis(10), 0.0)
}

/// `n` space-separated filler words, roughly `n` tokens of prose.
pub fn words(n: usize) -> String {
    let mut out = String::with_capacity(n * 5);
    for i in 0..n {
        if i > 0 {
            out.push(' ');
        }
        out.push_str("word");
    }
    out
}

/// A section under a markdown heading, body sized to roughly `body_words`
/// tokens.
pub fn section(title: &str, body_words: usize) -> String {
    format!("# {title}\n\n{}\n\n", words(body_words))
}
