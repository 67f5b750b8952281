//! End-to-end ingestion against real HTTP services: URL-triggered fetch,
//! the HTTP embedding provider, and retry behavior driven by live status
//! codes rather than injected failures.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use chunkforge::config::PipelineConfig;
use chunkforge::embed::{HttpEmbeddingProvider, MockEmbeddingProvider};
use chunkforge::orchestrator::{Orchestrator, Submission};
use chunkforge::store::{ChunkStore, MemoryStore};
use chunkforge::tokenizer::TokenCounter;
use chunkforge::transcribe::MockTranscriber;
use chunkforge::types::JobStatus;

fn base_config(server: &MockServer) -> PipelineConfig {
    let mut config = PipelineConfig::from_env()
        .with_backoff(Duration::from_millis(10), 0.0)
        .with_text_model("text-embedding-004", 4);
    config.embeddings_url = Some(server.url("/embed"));
    config.api_key = Some("test-key".into());
    config
}

/// Pipeline wired to the real HTTP embedding provider.
fn http_pipeline(config: PipelineConfig) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(
        HttpEmbeddingProvider::new(&config, TokenCounter::shared()).expect("provider config"),
    );
    let transcriber = Arc::new(MockTranscriber::new("transcript"));
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        store.clone(),
        embedder,
        transcriber,
    )
    .expect("orchestrator construction");
    (orchestrator, store)
}

/// Pipeline with a mock embedder, for tests that only exercise the fetcher.
fn fetch_pipeline(config: PipelineConfig) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(MockEmbeddingProvider::default());
    let transcriber = Arc::new(MockTranscriber::new("transcript"));
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        store.clone(),
        embedder,
        transcriber,
    )
    .expect("orchestrator construction");
    (orchestrator, store)
}

#[tokio::test]
async fn url_document_is_fetched_embedded_and_stored() {
    let server = MockServer::start_async().await;
    let fetch_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/guide.txt");
            then.status(200)
                .header("content-type", "text/plain")
                .body("# Guide\n\nFetched over the wire.");
        })
        .await;
    let embed_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embed")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"model": "text-embedding-004"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "embedding": [0.5, -0.25, 0.125, 1.0] }));
        })
        .await;

    let (orchestrator, store) = http_pipeline(base_config(&server));
    let job = orchestrator
        .ingest(Submission::url(server.url("/docs/guide.txt")))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Processed);
    assert_eq!(fetch_mock.hits_async().await, 1);
    assert_eq!(embed_mock.hits_async().await, 1);

    let chunks = store.chunks_for_document(job.document_id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].embedding, vec![0.5, -0.25, 0.125, 1.0]);
    assert!(chunks[0].text.contains("Fetched over the wire"));
}

#[tokio::test]
async fn embedding_503_exhausts_the_retry_budget() {
    let server = MockServer::start_async().await;
    let embed_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(503);
        })
        .await;

    let (orchestrator, _store) = http_pipeline(base_config(&server));
    let job = orchestrator
        .ingest(Submission::bytes(
            Some("doc.txt".into()),
            b"a short document body".to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 3);
    assert_eq!(
        embed_mock.hits_async().await,
        4,
        "one initial attempt plus three re-attempts"
    );
}

#[tokio::test]
async fn embedding_401_fails_without_retrying() {
    let server = MockServer::start_async().await;
    let embed_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(401);
        })
        .await;

    let (orchestrator, _store) = http_pipeline(base_config(&server));
    let job = orchestrator
        .ingest(Submission::bytes(
            Some("doc.txt".into()),
            b"a short document body".to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 0);
    assert_eq!(embed_mock.hits_async().await, 1);
    assert!(job.last_error.is_some());
}

#[tokio::test]
async fn missing_source_fails_the_download_stage() {
    let server = MockServer::start_async().await;
    let fetch_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/missing/file.txt");
            then.status(404);
        })
        .await;

    let (orchestrator, store) = fetch_pipeline(base_config(&server));
    let job = orchestrator
        .ingest(Submission::url(server.url("/missing/file.txt")))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 0, "unexpected statuses fail fast");
    assert_eq!(fetch_mock.hits_async().await, 1);
    assert!(store
        .chunks_for_document(job.document_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn flaky_source_recovers_within_the_budget() {
    let server = MockServer::start_async().await;
    // First response is a 503; the mock is then replaced by a healthy one.
    let failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky.txt");
            then.status(503);
        })
        .await;

    let (orchestrator, _store) = fetch_pipeline(base_config(&server));
    let orchestrator = Arc::new(orchestrator);
    let queued = orchestrator
        .submit(Submission::url(server.url("/flaky.txt")))
        .await
        .unwrap();

    // Let the first attempt hit the failing mock, then swap in success while
    // the job is sleeping out its backoff.
    let processing = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.process(queued).await })
    };
    while failing.hits_async().await == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // Register the healthy mock before removing the failing one, so every
    // retry finds a match.
    server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky.txt");
            then.status(200).body("recovered document body");
        })
        .await;
    failing.delete_async().await;

    let job = processing.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processed);
    assert!(job.retry_count >= 1);
}

#[tokio::test]
async fn downloaded_bytes_must_match_the_expected_format() {
    let server = MockServer::start_async().await;
    // URL claims a text document; the body is a PNG.
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&[1, 2, 3, 4]);
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/notes.txt");
            then.status(200).body(png.clone());
        })
        .await;

    let (orchestrator, _store) = fetch_pipeline(base_config(&server));
    let job = orchestrator
        .ingest(Submission::url(server.url("/notes.txt")))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.retry_count, 0, "format mismatch is never retried");
    let message = job.last_error.as_ref().map(|e| e.message.clone()).unwrap();
    assert!(message.contains("downloading"), "failed in the download stage: {message}");
}
