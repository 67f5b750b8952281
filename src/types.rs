//! Core vocabulary shared across the pipeline: content types, job statuses,
//! stage names, and the derived display state.
//!
//! Everything here is persisted as plain strings, so the string codecs
//! (`as_str`/`parse`) are the compatibility surface. Renaming a variant's
//! string form is a breaking change for every status consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of source content a job ingests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Document,
    Image,
    Video,
    Audio,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Document => "document",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(ContentType::Document),
            "image" => Some(ContentType::Image),
            "video" => Some(ContentType::Video),
            "audio" => Some(ContentType::Audio),
            _ => None,
        }
    }

    /// Ordered stage walk for this content type.
    ///
    /// The vocabulary is fixed; consumers key display logic off these names,
    /// so the sequence for a given content type only changes with a version
    /// bump.
    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            ContentType::Document => &[
                StageKind::Downloading,
                StageKind::ExtractingText,
                StageKind::GeneratingEmbeddings,
                StageKind::Storing,
            ],
            ContentType::Image => &[
                StageKind::Downloading,
                StageKind::GeneratingEmbeddings,
                StageKind::Storing,
            ],
            ContentType::Video | ContentType::Audio => &[
                StageKind::Downloading,
                StageKind::Transcribing,
                StageKind::GeneratingEmbeddings,
                StageKind::Storing,
            ],
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job status.
///
/// This is the smallest sufficient enumeration: retry attempts happen inside
/// `Processing` and are never stored as their own status. Richer display
/// states are derived via [`DisplayState::derive`], never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Processed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Processed => "processed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "processed" => Some(JobStatus::Processed),
            "error" => Some(JobStatus::Error),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are never re-entered automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Processed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Legal status transitions. Everything not listed here is rejected by
    /// the stores.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Processed) => true,
            (JobStatus::Processing, JobStatus::Error) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named processing stages, in the fixed vocabulary shared with status
/// consumers: `downloading`, `extracting_text`, `transcribing`,
/// `generating_embeddings`, `storing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Downloading,
    ExtractingText,
    Transcribing,
    GeneratingEmbeddings,
    Storing,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Downloading => "downloading",
            StageKind::ExtractingText => "extracting_text",
            StageKind::Transcribing => "transcribing",
            StageKind::GeneratingEmbeddings => "generating_embeddings",
            StageKind::Storing => "storing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloading" => Some(StageKind::Downloading),
            "extracting_text" => Some(StageKind::ExtractingText),
            "transcribing" => Some(StageKind::Transcribing),
            "generating_embeddings" => Some(StageKind::GeneratingEmbeddings),
            "storing" => Some(StageKind::Storing),
            _ => None,
        }
    }

    /// Rough completion percentage once this stage has started. Used only
    /// for progress display; never persisted.
    pub fn progress_weight(&self) -> u8 {
        match self {
            StageKind::Downloading => 10,
            StageKind::ExtractingText => 30,
            StageKind::Transcribing => 45,
            StageKind::GeneratingEmbeddings => 70,
            StageKind::Storing => 90,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which model family produced a chunk's primary embedding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Text,
    Multimodal,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Text => "text",
            EmbeddingKind::Multimodal => "multimodal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(EmbeddingKind::Text),
            "multimodal" => Some(EmbeddingKind::Multimodal),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-boundary view of a job's state, computed from
/// `(status, retry_count, max_retries)` and never stored.
///
/// A consumer that wants to show "retrying 2 of 3" derives it here instead
/// of expecting a dedicated persisted status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayState {
    Queued,
    InProgress {
        stage: StageKind,
    },
    Retrying {
        stage: StageKind,
        attempt: u32,
        max_retries: u32,
    },
    Completed,
    Failed,
    Cancelled,
}

impl DisplayState {
    pub fn derive(
        status: JobStatus,
        stage: Option<StageKind>,
        retry_count: u32,
        max_retries: u32,
    ) -> Self {
        match status {
            JobStatus::Pending => DisplayState::Queued,
            JobStatus::Processing => {
                let stage = stage.unwrap_or(StageKind::Downloading);
                if retry_count > 0 {
                    DisplayState::Retrying {
                        stage,
                        attempt: retry_count,
                        max_retries,
                    }
                } else {
                    DisplayState::InProgress { stage }
                }
            }
            JobStatus::Processed => DisplayState::Completed,
            JobStatus::Error => DisplayState::Failed,
            JobStatus::Cancelled => DisplayState::Cancelled,
        }
    }
}
