//! Embedding generation: the provider seam, the HTTP implementation, and the
//! deterministic mock used by tests.
//!
//! Providers enforce the input-size contract themselves: oversized text is
//! rejected, never truncated. That rejection is what makes the chunker's
//! token discipline meaningful at the API boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::errors::{Classify, Retryability};
use crate::tokenizer::TokenCounter;

#[derive(Debug, Error, Diagnostic)]
pub enum EmbedError {
    #[error("embedding request rejected: empty input")]
    #[diagnostic(code(chunkforge::embed::empty))]
    EmptyInput,

    #[error("embedding input of {tokens} tokens exceeds the {limit} token limit")]
    #[diagnostic(
        code(chunkforge::embed::oversized),
        help("The chunker should have kept this under the limit; check chunk config.")
    )]
    OversizedInput { tokens: usize, limit: usize },

    #[error("embedding service rejected credentials (status {status})")]
    #[diagnostic(code(chunkforge::embed::auth))]
    Auth { status: u16 },

    #[error("embedding request timed out after {elapsed_ms}ms")]
    #[diagnostic(code(chunkforge::embed::timeout))]
    Timeout { elapsed_ms: u64 },

    #[error("embedding service unavailable (status {status})")]
    #[diagnostic(code(chunkforge::embed::unavailable))]
    Unavailable { status: u16 },

    #[error("embedding service rate-limited the request")]
    #[diagnostic(code(chunkforge::embed::rate_limited))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("embedding service error: {message}")]
    #[diagnostic(code(chunkforge::embed::http))]
    Http { message: String },

    #[error("embedding response malformed: {reason}")]
    #[diagnostic(code(chunkforge::embed::response))]
    BadResponse { reason: String },

    #[error("embedding provider misconfigured: {reason}")]
    #[diagnostic(
        code(chunkforge::embed::config),
        help("Set the embeddings service URL and model identifiers in the pipeline config.")
    )]
    Config { reason: String },
}

impl Classify for EmbedError {
    fn retryability(&self) -> Retryability {
        match self {
            EmbedError::Timeout { .. }
            | EmbedError::Unavailable { .. }
            | EmbedError::RateLimited { .. } => Retryability::Retryable,
            EmbedError::EmptyInput
            | EmbedError::OversizedInput { .. }
            | EmbedError::Auth { .. }
            | EmbedError::Http { .. }
            | EmbedError::BadResponse { .. }
            | EmbedError::Config { .. } => Retryability::NonRetryable,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbedError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// The embedding seam. Text and multimodal embeddings come from different
/// models with different dimensions.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a media segment (image bytes or a video segment slice), with an
    /// optional generated context description.
    async fn embed_multimodal(
        &self,
        media: &[u8],
        context: Option<&str>,
    ) -> Result<Vec<f32>, EmbedError>;

    fn text_dim(&self) -> usize;
    fn multimodal_dim(&self) -> usize;
}

/// Shared input guard: reject empty and oversized text before any call.
fn check_text_input(
    text: &str,
    counter: &TokenCounter,
    model: &str,
    limit: usize,
) -> Result<(), EmbedError> {
    if text.trim().is_empty() {
        return Err(EmbedError::EmptyInput);
    }
    let tokens = counter.count(text, model);
    if tokens > limit {
        return Err(EmbedError::OversizedInput { tokens, limit });
    }
    Ok(())
}

fn status_to_error(status: u16, retry_after_secs: Option<u64>) -> EmbedError {
    match status {
        401 | 403 => EmbedError::Auth { status },
        429 => EmbedError::RateLimited { retry_after_secs },
        500 | 502 | 503 | 504 => EmbedError::Unavailable { status },
        other => EmbedError::Http {
            message: format!("unexpected status {other}"),
        },
    }
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP embedding provider speaking a minimal JSON contract:
/// `POST <url>` with `{model, input}` (text) or `{model, media_hex, context}`
/// (multimodal), answered by `{embedding: [f32]}`.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    text_model: String,
    multimodal_model: String,
    text_dim: usize,
    multimodal_dim: usize,
    max_tokens: usize,
    timeout: Duration,
    counter: Arc<TokenCounter>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &PipelineConfig, counter: Arc<TokenCounter>) -> Result<Self, EmbedError> {
        let url = config
            .embeddings_url
            .clone()
            .ok_or_else(|| EmbedError::Config {
                reason: "no embeddings service URL configured".into(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EmbedError::Config {
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            text_model: config.text_model.clone(),
            multimodal_model: config.multimodal_model.clone(),
            text_dim: config.text_dim,
            multimodal_dim: config.multimodal_dim,
            max_tokens: config.max_tokens,
            timeout: config.request_timeout,
            counter,
        })
    }

    async fn post(&self, request: EmbedRequest<'_>, want_dim: usize) -> Result<Vec<f32>, EmbedError> {
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout {
                    elapsed_ms: self.timeout.as_millis() as u64,
                }
            } else {
                EmbedError::Http {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(status_to_error(status, retry_after));
        }

        let body: EmbedResponse = response.json().await.map_err(|e| EmbedError::BadResponse {
            reason: e.to_string(),
        })?;
        if body.embedding.len() != want_dim {
            return Err(EmbedError::BadResponse {
                reason: format!(
                    "expected {want_dim}-dimensional vector, got {}",
                    body.embedding.len()
                ),
            });
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        check_text_input(text, &self.counter, &self.text_model, self.max_tokens)?;
        self.post(
            EmbedRequest {
                model: &self.text_model,
                input: Some(text),
                media_hex: None,
                context: None,
            },
            self.text_dim,
        )
        .await
    }

    async fn embed_multimodal(
        &self,
        media: &[u8],
        context: Option<&str>,
    ) -> Result<Vec<f32>, EmbedError> {
        if media.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        self.post(
            EmbedRequest {
                model: &self.multimodal_model,
                input: None,
                media_hex: Some(hex::encode(media)),
                context,
            },
            self.multimodal_dim,
        )
        .await
    }

    fn text_dim(&self) -> usize {
        self.text_dim
    }

    fn multimodal_dim(&self) -> usize {
        self.multimodal_dim
    }
}

/// Failure modes the mock can inject, mirroring the HTTP taxonomy.
#[derive(Clone, Copy, Debug)]
pub enum InjectedFailure {
    Auth { status: u16 },
    Unavailable { status: u16 },
    RateLimited { retry_after_secs: Option<u64> },
    Timeout,
}

impl InjectedFailure {
    fn to_embed_error(self) -> EmbedError {
        match self {
            InjectedFailure::Auth { status } => EmbedError::Auth { status },
            InjectedFailure::Unavailable { status } => EmbedError::Unavailable { status },
            InjectedFailure::RateLimited { retry_after_secs } => {
                EmbedError::RateLimited { retry_after_secs }
            }
            InjectedFailure::Timeout => EmbedError::Timeout { elapsed_ms: 30_000 },
        }
    }
}

struct FailurePlan {
    failure: InjectedFailure,
    /// Remaining failing calls; `None` fails forever.
    remaining: Option<usize>,
}

/// Deterministic embedding provider for tests: vectors are seeded by a sha256
/// of the input, so identical inputs always produce bit-identical vectors.
///
/// Tracks call counts and timestamps, and injects failures on demand, which
/// is what the retry/backoff tests key their assertions on.
pub struct MockEmbeddingProvider {
    text_dim: usize,
    multimodal_dim: usize,
    max_tokens: usize,
    model: String,
    counter: Arc<TokenCounter>,
    text_calls: AtomicUsize,
    multimodal_calls: AtomicUsize,
    call_instants: parking_lot::Mutex<Vec<tokio::time::Instant>>,
    failure: parking_lot::Mutex<Option<FailurePlan>>,
}

impl MockEmbeddingProvider {
    pub fn new(text_dim: usize, multimodal_dim: usize) -> Self {
        Self {
            text_dim,
            multimodal_dim,
            max_tokens: PipelineConfig::DEFAULT_MAX_TOKENS,
            model: "mock-embedding".to_string(),
            counter: TokenCounter::shared(),
            text_calls: AtomicUsize::new(0),
            multimodal_calls: AtomicUsize::new(0),
            call_instants: parking_lot::Mutex::new(Vec::new()),
            failure: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Fail every call from now on with `failure`.
    pub fn fail_always(&self, failure: InjectedFailure) {
        *self.failure.lock() = Some(FailurePlan {
            failure,
            remaining: None,
        });
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_times(&self, failure: InjectedFailure, n: usize) {
        *self.failure.lock() = Some(FailurePlan {
            failure,
            remaining: Some(n),
        });
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn multimodal_calls(&self) -> usize {
        self.multimodal_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.text_calls() + self.multimodal_calls()
    }

    /// Instants of every call, in order. Paused-clock tests read the backoff
    /// spacing from these.
    pub fn call_instants(&self) -> Vec<tokio::time::Instant> {
        self.call_instants.lock().clone()
    }

    fn record_call(&self, counter: &AtomicUsize) -> Result<(), EmbedError> {
        counter.fetch_add(1, Ordering::SeqCst);
        self.call_instants.lock().push(tokio::time::Instant::now());
        let mut plan = self.failure.lock();
        if let Some(active) = plan.as_mut() {
            let failure = active.failure;
            match active.remaining.as_mut() {
                None => return Err(failure.to_embed_error()),
                Some(0) => {
                    *plan = None;
                }
                Some(n) => {
                    *n -= 1;
                    return Err(failure.to_embed_error());
                }
            }
        }
        Ok(())
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(
            PipelineConfig::DEFAULT_TEXT_DIM,
            PipelineConfig::DEFAULT_MULTIMODAL_DIM,
        )
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        check_text_input(text, &self.counter, &self.model, self.max_tokens)?;
        self.record_call(&self.text_calls)?;
        Ok(seeded_vector(text.as_bytes(), self.text_dim))
    }

    async fn embed_multimodal(
        &self,
        media: &[u8],
        context: Option<&str>,
    ) -> Result<Vec<f32>, EmbedError> {
        if media.is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        self.record_call(&self.multimodal_calls)?;
        let mut seed = media.to_vec();
        if let Some(context) = context {
            seed.extend_from_slice(context.as_bytes());
        }
        Ok(seeded_vector(&seed, self.multimodal_dim))
    }

    fn text_dim(&self) -> usize {
        self.text_dim
    }

    fn multimodal_dim(&self) -> usize {
        self.multimodal_dim
    }
}

/// Expand `seed` into a deterministic unit-range vector of length `dim`.
pub fn seeded_vector(seed: &[u8], dim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dim);
    let mut block = 0u32;
    while out.len() < dim {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(block.to_le_bytes());
        let digest = hasher.finalize();
        for word in digest.chunks_exact(4) {
            if out.len() == dim {
                break;
            }
            let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            out.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        block += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_is_deterministic_per_input() {
        let provider = MockEmbeddingProvider::new(8, 16);
        let a = provider.embed_text("alpha beta").await.unwrap();
        let b = provider.embed_text("alpha beta").await.unwrap();
        let c = provider.embed_text("gamma").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        assert_eq!(provider.text_calls(), 3);
    }

    #[tokio::test]
    async fn oversized_text_is_rejected_not_truncated() {
        let provider = MockEmbeddingProvider::new(8, 16).with_max_tokens(4);
        let err = provider
            .embed_text("far too many words to fit in four tokens at all")
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::OversizedInput { limit: 4, .. }));
        // Rejection happens before the call is counted.
        assert_eq!(provider.text_calls(), 0);
    }

    #[tokio::test]
    async fn empty_inputs_fail_fast() {
        let provider = MockEmbeddingProvider::new(8, 16);
        assert!(matches!(
            provider.embed_text("   ").await,
            Err(EmbedError::EmptyInput)
        ));
        assert!(matches!(
            provider.embed_multimodal(&[], None).await,
            Err(EmbedError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn fail_times_recovers_after_budget() {
        let provider = MockEmbeddingProvider::new(8, 16);
        provider.fail_times(InjectedFailure::Unavailable { status: 503 }, 2);
        assert!(provider.embed_text("one").await.is_err());
        assert!(provider.embed_text("two").await.is_err());
        assert!(provider.embed_text("three").await.is_ok());
        assert_eq!(provider.text_calls(), 3);
    }

    #[tokio::test]
    async fn context_changes_the_multimodal_vector() {
        let provider = MockEmbeddingProvider::new(8, 16);
        let plain = provider.embed_multimodal(&[1, 2, 3], None).await.unwrap();
        let with_context = provider
            .embed_multimodal(&[1, 2, 3], Some("error code on screen"))
            .await
            .unwrap();
        assert_eq!(plain.len(), 16);
        assert_ne!(plain, with_context);
    }
}
