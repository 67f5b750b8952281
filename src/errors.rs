//! Error classification and the persisted error record.
//!
//! Every stage failure funnels through [`StageError`] and is classified by
//! the single [`classify`] boundary before any retry decision is made. The
//! classification is explicit per variant; anything a variant does not
//! explicitly mark retryable is non-retryable, so an unknown failure fails
//! fast instead of looping.

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::ChunkerError;
use crate::embed::EmbedError;
use crate::extract::ExtractError;
use crate::fetch::FetchError;
use crate::store::StoreError;
use crate::transcribe::TranscribeError;
use crate::types::StageKind;

/// Outcome of classifying an error: whether the failing stage may be
/// re-attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

impl Retryability {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Retryability::Retryable)
    }
}

/// Implemented by every error type a stage can surface.
///
/// Classification is a pure function of the error variant. Implementations
/// must match exhaustively so that adding a variant forces a conscious
/// retryability decision.
pub trait Classify {
    fn retryability(&self) -> Retryability;

    /// Server-provided backoff hint (e.g. a rate-limit `Retry-After`),
    /// honored when it exceeds the computed exponential delay.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Aggregate error surfaced from stage execution to the orchestrator.
///
/// The orchestrator never inspects the inner errors beyond classification;
/// the retry decision is made here and nowhere else.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunk(#[from] ChunkerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transcribe(#[from] TranscribeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl Classify for StageError {
    fn retryability(&self) -> Retryability {
        match self {
            StageError::Fetch(e) => e.retryability(),
            StageError::Extract(e) => e.retryability(),
            StageError::Chunk(e) => e.retryability(),
            StageError::Embed(e) => e.retryability(),
            StageError::Transcribe(e) => e.retryability(),
            StageError::Store(e) => e.retryability(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            StageError::Fetch(e) => e.retry_after(),
            StageError::Extract(e) => e.retry_after(),
            StageError::Chunk(e) => e.retry_after(),
            StageError::Embed(e) => e.retry_after(),
            StageError::Transcribe(e) => e.retry_after(),
            StageError::Store(e) => e.retry_after(),
        }
    }
}

/// The shared classification boundary. All retry decisions in the
/// orchestrator go through this call.
pub fn classify(error: &StageError) -> Retryability {
    error.retryability()
}

/// Serializable error record persisted as a job's `last_error`.
///
/// Carries a message, an optional cause chain, and free-form JSON details.
/// Decoupled from the live error enums so persisted rows stay readable as
/// those evolve.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorRecord>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for ErrorRecord {
    fn default() -> Self {
        ErrorRecord {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl ErrorRecord {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        ErrorRecord {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Build the record persisted when `stage` fails with `error`.
    pub fn from_stage(stage: StageKind, error: &StageError) -> Self {
        let retryable = classify(error).is_retryable();
        ErrorRecord::msg(format!("stage `{stage}` failed"))
            .with_cause(ErrorRecord::msg(error.to_string()))
            .with_details(serde_json::json!({
                "stage": stage.as_str(),
                "retryable": retryable,
            }))
    }
}
