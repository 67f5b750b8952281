//! Content extraction: source bytes to structured, chunkable content.
//!
//! Every content type shares the same job state machine; only the extraction
//! logic differs. Document sources become a structural unit sequence, images
//! become a single multimodal unit, and media sources become fixed-duration
//! segments with transcripts.

pub mod document;
pub mod image;
pub mod media;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::document::StructuredDocument;
use crate::errors::{Classify, Retryability};
use crate::fetch::FetchedSource;
use crate::transcribe::TranscribeError;
use crate::types::ContentType;

pub use document::DocumentExtractor;
pub use image::ImageExtractor;
pub use media::{MediaExtractor, MediaSegment, SegmentExtraction};

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("source content is malformed: {reason}")]
    #[diagnostic(
        code(chunkforge::extract::malformed),
        help("Corrupt sources are terminal; no retry budget is spent on them.")
    )]
    Malformed { reason: String },

    #[error("no extractor for content type `{content_type}`")]
    #[diagnostic(code(chunkforge::extract::unsupported))]
    Unsupported { content_type: ContentType },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transcribe(#[from] TranscribeError),
}

impl Classify for ExtractError {
    fn retryability(&self) -> Retryability {
        match self {
            ExtractError::Malformed { .. } | ExtractError::Unsupported { .. } => {
                Retryability::NonRetryable
            }
            ExtractError::Transcribe(e) => e.retryability(),
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            ExtractError::Transcribe(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// What extraction produced for one source.
#[derive(Clone, Debug)]
pub enum Extraction {
    /// Structural text, ready for the chunker.
    Text(StructuredDocument),
    /// One image: a single multimodal embedding, no chunking.
    Image { bytes: Vec<u8> },
    /// Segmented media with per-segment transcripts.
    Media { segments: Vec<SegmentExtraction> },
}

/// Per-type extraction seam. Implementations must be re-runnable: a retried
/// extraction overwrites its output rather than appending.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &FetchedSource) -> Result<Extraction, ExtractError>;
}
