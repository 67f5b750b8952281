//! Source acquisition: download with an explicit timeout, plus content
//! addressing.
//!
//! The content address is a sha256 of the source bytes (or, for URL-triggered
//! jobs, of the exact trigger URL), never a display-layer filename. Display
//! names get transformed upstream; the address must be stable across the
//! upload-and-trigger boundary.

use std::time::Duration;

use miette::Diagnostic;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::errors::{Classify, Retryability};

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid source url `{url}`: {reason}")]
    #[diagnostic(code(chunkforge::fetch::url))]
    InvalidUrl { url: String, reason: String },

    #[error("source download timed out after {elapsed_ms}ms")]
    #[diagnostic(
        code(chunkforge::fetch::timeout),
        help("Timeouts are retried within the job's retry budget.")
    )]
    Timeout { elapsed_ms: u64 },

    #[error("source rejected the request with authentication status {status}")]
    #[diagnostic(
        code(chunkforge::fetch::auth),
        help("Check credentials; auth failures are never retried.")
    )]
    Auth { status: u16 },

    #[error("source temporarily unavailable (status {status})")]
    #[diagnostic(code(chunkforge::fetch::unavailable))]
    Unavailable { status: u16 },

    #[error("source rate-limited the request")]
    #[diagnostic(code(chunkforge::fetch::rate_limited))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("source returned unexpected status {status}")]
    #[diagnostic(code(chunkforge::fetch::status))]
    Http { status: u16 },

    #[error("transport failure fetching source: {message}")]
    #[diagnostic(code(chunkforge::fetch::transport))]
    Transport { message: String },

    #[error("http client construction failed: {message}")]
    #[diagnostic(code(chunkforge::fetch::client))]
    Client { message: String },
}

impl Classify for FetchError {
    fn retryability(&self) -> Retryability {
        match self {
            FetchError::Timeout { .. }
            | FetchError::Unavailable { .. }
            | FetchError::RateLimited { .. } => Retryability::Retryable,
            // Transport errors are deliberately not retried: an unclassified
            // failure defaults to fail-fast.
            FetchError::InvalidUrl { .. }
            | FetchError::Auth { .. }
            | FetchError::Http { .. }
            | FetchError::Transport { .. }
            | FetchError::Client { .. } => Retryability::NonRetryable,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// A downloaded (or locally materialized) source, hashed in the same pass.
#[derive(Clone, Debug)]
pub struct FetchedSource {
    pub origin: String,
    pub bytes: Vec<u8>,
    pub content_hash: String,
    /// `Content-Type` header when the source came over HTTP.
    pub media_type: Option<String>,
}

impl FetchedSource {
    /// Wrap bytes that already landed in the input store. Re-materializing is
    /// a pure overwrite, so stage retries stay idempotent.
    pub fn from_bytes(origin: impl Into<String>, bytes: Vec<u8>) -> Self {
        let content_hash = content_address(&bytes);
        Self {
            origin: origin.into(),
            bytes,
            content_hash,
            media_type: None,
        }
    }

    /// Filename component of the origin, for extension-fallback sniffing.
    pub fn filename(&self) -> Option<&str> {
        let tail = self.origin.rsplit('/').next()?;
        let tail = tail.split('?').next().unwrap_or(tail);
        (!tail.is_empty()).then_some(tail)
    }
}

/// Hex sha256 of `bytes`, the idempotency key for byte-triggered ingestion.
pub fn content_address(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable address for URL-triggered jobs: the hash of the exact trigger URL.
pub fn url_address(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// HTTP source fetcher with a hard per-request timeout.
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedSource, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(status_error(status, retry_after_header(&response)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport(e))?
            .to_vec();
        let content_hash = content_address(&bytes);
        Ok(FetchedSource {
            origin: url.to_string(),
            bytes,
            content_hash,
            media_type: None,
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                elapsed_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::Transport {
                message: e.to_string(),
            }
        }
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn status_error(status: u16, retry_after_secs: Option<u64>) -> FetchError {
    match status {
        401 | 403 => FetchError::Auth { status },
        429 => FetchError::RateLimited { retry_after_secs },
        500 | 502 | 503 | 504 => FetchError::Unavailable { status },
        _ => FetchError::Http { status },
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}
