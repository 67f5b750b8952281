//! Video/audio extraction: fixed-duration segmentation plus transcription.
//!
//! The pipeline never decodes media itself; segmentation works from the
//! declared total duration (carried with the submission), slicing the source
//! bytes proportionally for the transcription and multimodal services. A
//! source with no declared duration is treated as a single segment.

use std::time::Duration;

use async_trait::async_trait;

use crate::document::SourceSpan;
use crate::fetch::FetchedSource;
use crate::transcribe::{Transcriber, Transcript};

use super::{Extraction, ExtractError, Extractor};

/// One fixed-duration slice of a media source.
#[derive(Clone, Debug)]
pub struct MediaSegment {
    pub index: usize,
    /// Time range within the source.
    pub span: SourceSpan,
    /// Proportional byte slice handed to the media services.
    pub bytes: Vec<u8>,
}

/// A segment together with its transcription output.
#[derive(Clone, Debug)]
pub struct SegmentExtraction {
    pub segment: MediaSegment,
    pub transcript: Transcript,
    /// Whether this segment gets a multimodal embedding (video yes, audio no).
    pub visual: bool,
}

/// Split `bytes` into fixed-duration segments. With no declared duration the
/// whole source is one segment spanning an unknown range.
pub fn segment_media(
    bytes: &[u8],
    declared_duration: Option<Duration>,
    segment_duration: Duration,
) -> Vec<MediaSegment> {
    let Some(total) = declared_duration.filter(|d| !d.is_zero()) else {
        return vec![MediaSegment {
            index: 0,
            span: SourceSpan::Millis { start: 0, end: 0 },
            bytes: bytes.to_vec(),
        }];
    };

    let total_ms = total.as_millis() as u64;
    let step_ms = segment_duration.as_millis().max(1) as u64;
    let count = total_ms.div_ceil(step_ms).max(1) as usize;

    (0..count)
        .map(|i| {
            let start_ms = i as u64 * step_ms;
            let end_ms = (start_ms + step_ms).min(total_ms);
            let byte_start = bytes.len() * i / count;
            let byte_end = bytes.len() * (i + 1) / count;
            MediaSegment {
                index: i,
                span: SourceSpan::Millis {
                    start: start_ms,
                    end: end_ms,
                },
                bytes: bytes[byte_start..byte_end].to_vec(),
            }
        })
        .collect()
}

/// Segments a media source and transcribes every segment in order.
pub struct MediaExtractor<T: Transcriber> {
    transcriber: T,
    segment_duration: Duration,
    declared_duration: Option<Duration>,
    /// Video sources get multimodal embeddings and context descriptions.
    visual: bool,
}

impl<T: Transcriber> MediaExtractor<T> {
    pub fn new(transcriber: T, segment_duration: Duration, visual: bool) -> Self {
        Self {
            transcriber,
            segment_duration,
            declared_duration: None,
            visual,
        }
    }

    #[must_use]
    pub fn with_declared_duration(mut self, duration: Option<Duration>) -> Self {
        self.declared_duration = duration;
        self
    }
}

#[async_trait]
impl<T: Transcriber> Extractor for MediaExtractor<T> {
    async fn extract(&self, source: &FetchedSource) -> Result<Extraction, ExtractError> {
        if source.bytes.is_empty() {
            return Err(ExtractError::Malformed {
                reason: "empty media source".into(),
            });
        }
        let mut segments = Vec::new();
        for segment in segment_media(&source.bytes, self.declared_duration, self.segment_duration)
        {
            let transcript = self
                .transcriber
                .transcribe(&segment.bytes, self.visual)
                .await?;
            segments.push(SegmentExtraction {
                segment,
                transcript,
                visual: self.visual,
            });
        }
        Ok(Extraction::Media { segments })
    }
}
