//! Persistence layer: job and chunk storage behind async traits.
//!
//! Two backends, mirroring each other: [`MemoryStore`] for tests and
//! embedded use, and `SqliteStore` (behind the `sqlite` feature) for durable
//! storage. Both enforce the same contract: idempotent job creation keyed by
//! content address, all-or-nothing chunk writes per document, and terminal
//! statuses that can never be overwritten.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod persistence;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::{Classify, Retryability};
use crate::job::{JobStatusView, ProcessingJob};
use crate::types::{ContentType, EmbeddingKind};

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("storage backend error: {message}")]
    #[diagnostic(
        code(chunkforge::store::backend),
        help("Transient backend failures are retried within the job's retry budget.")
    )]
    Backend { message: String },

    #[error("storage constraint conflict: {message}")]
    #[diagnostic(
        code(chunkforge::store::conflict),
        help("Conflicts usually mean a concurrent worker won a race; re-fetch and compare.")
    )]
    Conflict { message: String },

    #[error("illegal persisted status transition {from} -> {to}")]
    #[diagnostic(code(chunkforge::store::transition))]
    InvalidTransition {
        from: crate::types::JobStatus,
        to: crate::types::JobStatus,
    },

    #[error("{what} not found")]
    #[diagnostic(code(chunkforge::store::not_found))]
    NotFound { what: String },

    #[error("persisted data is corrupt: {message}")]
    #[diagnostic(code(chunkforge::store::corrupt))]
    Corrupt { message: String },
}

impl Classify for StoreError {
    fn retryability(&self) -> Retryability {
        match self {
            // Transient backend failures and constraint races retry; the race
            // resolves by re-fetching the winner's row.
            StoreError::Backend { .. } | StoreError::Conflict { .. } => Retryability::Retryable,
            StoreError::InvalidTransition { .. }
            | StoreError::NotFound { .. }
            | StoreError::Corrupt { .. } => Retryability::NonRetryable,
        }
    }
}

/// A source document registered for ingestion, keyed by content address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub content_hash: String,
    pub origin: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
}

/// Input for the idempotent find-or-create.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub content_hash: String,
    pub origin: String,
    pub content_type: ContentType,
}

/// Result of the idempotent lookup: the job/document pair, and whether this
/// call created it or found a concurrent/prior ingestion.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub document: DocumentRecord,
    pub job: ProcessingJob,
    pub created: bool,
}

/// One persisted chunk: text, vectors, and provenance metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
    pub embedding_kind: EmbeddingKind,
    /// Shared media vector: N text chunks from one video segment all carry
    /// the same one.
    pub media_embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(
        document_id: Uuid,
        chunk_index: usize,
        text: impl Into<String>,
        token_count: usize,
        embedding: Vec<f32>,
        embedding_kind: EmbeddingKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            chunk_index,
            text: text.into(),
            token_count,
            embedding,
            embedding_kind,
            media_embedding: None,
            metadata: json!({}),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_media_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.media_embedding = Some(embedding);
        self
    }
}

/// Job persistence: idempotent creation, guarded status writes, status reads.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomic check-then-act keyed by content address: returns the existing
    /// job/document pair when the hash is already known, creates both
    /// otherwise. Two concurrent calls for the same hash must resolve to one
    /// pair, one caller seeing `created == false`.
    async fn find_or_create(
        &self,
        doc: NewDocument,
        max_retries: u32,
    ) -> Result<IngestOutcome, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError>;

    /// Atomically claim a `pending` job: the stored status moves to
    /// `processing` and the claimed row is returned. Any other stored status
    /// (a concurrent claimant won, or the job is terminal) returns `None`
    /// and writes nothing.
    async fn claim_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError>;

    async fn find_job_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<ProcessingJob>, StoreError>;

    /// Persist the job's mutable fields. Rejects writes that would move a
    /// stored terminal status anywhere else.
    async fn update_job(&self, job: &ProcessingJob) -> Result<(), StoreError>;

    /// The status read API: latest job for a document, as a display view.
    async fn job_status(&self, document_id: Uuid) -> Result<Option<JobStatusView>, StoreError>;
}

/// Chunk persistence: transactional replace per document.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace the document's chunk set atomically: prior chunks are deleted
    /// and the new set written in one transaction, so readers never observe
    /// a partial set. An empty `chunks` clears the document.
    async fn store_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError>;

    /// All chunks for a document, ordered by `chunk_index`.
    async fn chunks_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ChunkRecord>, StoreError>;
}
