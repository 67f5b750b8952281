//! Transcription seam for audio/video segments.
//!
//! The service is a black box: segment bytes in, transcript (and optionally a
//! short visual context description) out. The context description exists to
//! capture what the audio misses, like an error code shown on screen but
//! never narrated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::errors::{Classify, Retryability};

#[derive(Debug, Error, Diagnostic)]
pub enum TranscribeError {
    #[error("transcription service rejected credentials (status {status})")]
    #[diagnostic(code(chunkforge::transcribe::auth))]
    Auth { status: u16 },

    #[error("transcription request timed out after {elapsed_ms}ms")]
    #[diagnostic(code(chunkforge::transcribe::timeout))]
    Timeout { elapsed_ms: u64 },

    #[error("transcription service unavailable (status {status})")]
    #[diagnostic(code(chunkforge::transcribe::unavailable))]
    Unavailable { status: u16 },

    #[error("transcription service rate-limited the request")]
    #[diagnostic(code(chunkforge::transcribe::rate_limited))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("media segment could not be transcribed: {reason}")]
    #[diagnostic(
        code(chunkforge::transcribe::malformed),
        help("Corrupt media is terminal; the job fails without consuming retry budget.")
    )]
    Malformed { reason: String },

    #[error("transcription service error: {message}")]
    #[diagnostic(code(chunkforge::transcribe::http))]
    Http { message: String },
}

impl Classify for TranscribeError {
    fn retryability(&self) -> Retryability {
        match self {
            TranscribeError::Timeout { .. }
            | TranscribeError::Unavailable { .. }
            | TranscribeError::RateLimited { .. } => Retryability::Retryable,
            TranscribeError::Auth { .. }
            | TranscribeError::Malformed { .. }
            | TranscribeError::Http { .. } => Retryability::NonRetryable,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TranscribeError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Transcription output for one media segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// Generated description of on-screen visual content, when requested.
    pub context: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one segment's audio. `want_context` asks for the visual
    /// context description (video only).
    async fn transcribe(
        &self,
        segment_bytes: &[u8],
        want_context: bool,
    ) -> Result<Transcript, TranscribeError>;
}

#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for std::sync::Arc<T> {
    async fn transcribe(
        &self,
        segment_bytes: &[u8],
        want_context: bool,
    ) -> Result<Transcript, TranscribeError> {
        (**self).transcribe(segment_bytes, want_context).await
    }
}

#[derive(serde::Serialize)]
struct TranscribeRequest {
    media_hex: String,
    want_context: bool,
}

#[derive(serde::Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    context: Option<String>,
}

/// HTTP transcriber: `POST <url>` with `{media_hex, want_context}`, answered
/// by `{text, context?}`.
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(config: &PipelineConfig) -> Result<Self, TranscribeError> {
        let url = config
            .transcribe_url
            .clone()
            .ok_or_else(|| TranscribeError::Http {
                message: "no transcription service URL configured".into(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TranscribeError::Http {
                message: format!("http client: {e}"),
            })?;
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        segment_bytes: &[u8],
        want_context: bool,
    ) -> Result<Transcript, TranscribeError> {
        if segment_bytes.is_empty() {
            return Err(TranscribeError::Malformed {
                reason: "empty media segment".into(),
            });
        }
        let mut builder = self.client.post(&self.url).json(&TranscribeRequest {
            media_hex: hex::encode(segment_bytes),
            want_context,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TranscribeError::Timeout {
                    elapsed_ms: self.timeout.as_millis() as u64,
                }
            } else {
                TranscribeError::Http {
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
            return Err(match status {
                401 | 403 => TranscribeError::Auth { status },
                429 => TranscribeError::RateLimited {
                    retry_after_secs: retry_after,
                },
                500 | 502 | 503 | 504 => TranscribeError::Unavailable { status },
                other => TranscribeError::Http {
                    message: format!("unexpected status {other}"),
                },
            });
        }

        let body: TranscribeResponse =
            response.json().await.map_err(|e| TranscribeError::Http {
                message: format!("malformed response: {e}"),
            })?;
        Ok(Transcript {
            text: body.text,
            context: body.context,
        })
    }
}

/// Canned transcriber for tests: returns the configured transcript for every
/// segment, with optional failure injection.
pub struct MockTranscriber {
    transcript: String,
    context: Option<String>,
    calls: AtomicUsize,
    failure: parking_lot::Mutex<Option<TranscribeFailure>>,
}

#[derive(Clone, Copy, Debug)]
pub enum TranscribeFailure {
    Auth { status: u16 },
    Unavailable { status: u16 },
    Malformed,
}

impl MockTranscriber {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            context: None,
            calls: AtomicUsize::new(0),
            failure: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn fail_always(&self, failure: TranscribeFailure) {
        *self.failure.lock() = Some(failure);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        _segment_bytes: &[u8],
        want_context: bool,
    ) -> Result<Transcript, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.failure.lock() {
            return Err(match failure {
                TranscribeFailure::Auth { status } => TranscribeError::Auth { status },
                TranscribeFailure::Unavailable { status } => {
                    TranscribeError::Unavailable { status }
                }
                TranscribeFailure::Malformed => TranscribeError::Malformed {
                    reason: "injected corrupt segment".into(),
                },
            });
        }
        Ok(Transcript {
            text: self.transcript.clone(),
            context: if want_context {
                self.context.clone()
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_context_only_when_wanted() {
        let transcriber = MockTranscriber::new("spoken words").with_context("a chart on screen");
        let with = transcriber.transcribe(&[1], true).await.unwrap();
        assert_eq!(with.context.as_deref(), Some("a chart on screen"));
        let without = transcriber.transcribe(&[1], false).await.unwrap();
        assert_eq!(without.context, None);
        assert_eq!(transcriber.calls(), 2);
    }

    #[tokio::test]
    async fn injected_malformed_is_non_retryable() {
        let transcriber = MockTranscriber::new("words");
        transcriber.fail_always(TranscribeFailure::Malformed);
        let err = transcriber.transcribe(&[1], false).await.unwrap_err();
        assert_eq!(err.retryability(), Retryability::NonRetryable);
    }
}
