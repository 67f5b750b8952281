//! # Chunkforge: Multi-stage, Multi-modal Ingestion Pipeline Core
//!
//! Chunkforge turns source files (documents, images, video, audio) into
//! token-bounded, embedded chunks ready for retrieval, driving each source
//! through a multi-stage job with bounded retries and explicit error
//! classification.
//!
//! ## Core Concepts
//!
//! - **Jobs**: One processing job per source content address, walking
//!   `pending → processing → {processed | error}` (plus externally-triggered
//!   `cancelled`); retries happen inside `processing`, never as stored states
//! - **Stages**: download → type-specific extraction → chunk+embed → store,
//!   tracked per job through `current_stage`
//! - **Chunks**: token-bounded, split at structural boundaries, with
//!   provenance metadata and a shared multimodal vector for media segments
//! - **Classification**: a single boundary decides retryable vs.
//!   non-retryable for every stage failure; unknown errors fail fast
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chunkforge::config::PipelineConfig;
//! use chunkforge::embed::MockEmbeddingProvider;
//! use chunkforge::orchestrator::{Orchestrator, Submission};
//! use chunkforge::store::{ChunkStore, MemoryStore};
//! use chunkforge::transcribe::MockTranscriber;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(
//!     PipelineConfig::from_env(),
//!     store.clone(),
//!     store.clone(),
//!     Arc::new(MockEmbeddingProvider::default()),
//!     Arc::new(MockTranscriber::new("transcript")),
//! )?;
//!
//! let job = orchestrator
//!     .ingest(Submission::bytes(
//!         Some("notes.txt".into()),
//!         b"# Heading\n\nBody paragraph.".to_vec(),
//!     ))
//!     .await?;
//! println!("{:?}", job.status);
//!
//! let chunks = store.chunks_for_document(job.document_id).await?;
//! println!("{} chunks stored", chunks.len());
//! # Ok(())
//! # }
//! ```
//!
//! Swap `MemoryStore` for `SqliteStore` (the `sqlite` feature) for durable
//! storage, and the mock providers for `HttpEmbeddingProvider` /
//! `HttpTranscriber` against real services.
//!
//! ## Running a pool
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use chunkforge::orchestrator::{Orchestrator, Submission};
//! use chunkforge::worker::{JobQueue, WorkerPool};
//!
//! # async fn run(orchestrator: Arc<Orchestrator>) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = JobQueue::new(64);
//! let pool = WorkerPool::start(orchestrator.clone(), &queue, 4);
//!
//! let queued = orchestrator
//!     .submit(Submission::url("https://example.com/talk.mp4"))
//!     .await?;
//! queue.push(queued).await.ok();
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`orchestrator`] - Stage walk, retry loop, classification boundary
//! - [`job`] - The job model and its status transition guards
//! - [`chunker`] - Token-bounded structural chunking with force-split
//! - [`document`] - The structured unit sequence the chunker walks
//! - [`extract`] - Per-type extraction (document, image, media)
//! - [`embed`] - Embedding provider seam, HTTP and mock implementations
//! - [`transcribe`] - Transcription seam for media segments
//! - [`tokenizer`] - Token counting with a conservative fallback
//! - [`fetch`] - Source download and content addressing
//! - [`sniff`] - Content-type inference from magic bytes
//! - [`store`] - Job and chunk persistence (memory and SQLite backends)
//! - [`worker`] - Bounded job queue and worker pool
//! - [`events`] - Pipeline event bus with pluggable sinks and subscriptions
//! - [`errors`] - Error classification and the persisted error record
//! - [`config`] - Pipeline configuration and environment resolution
//! - [`telemetry`] - Tracing subscriber setup for hosts
//! - [`types`] - Shared vocabulary: content types, statuses, stages

pub mod chunker;
pub mod config;
pub mod document;
pub mod embed;
pub mod errors;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod job;
pub mod orchestrator;
pub mod sniff;
pub mod store;
pub mod telemetry;
pub mod tokenizer;
pub mod transcribe;
pub mod types;
pub mod worker;

pub use chunker::{ChunkDraft, Chunker, ChunkerConfig};
pub use config::PipelineConfig;
pub use errors::{Classify, ErrorRecord, Retryability, StageError, classify};
pub use events::{EventBus, EventSink, EventStream, PipelineEvent};
pub use job::{JobStatusView, ProcessingJob};
pub use orchestrator::{Orchestrator, OrchestratorError, QueuedJob, SourcePayload, Submission};
pub use store::{ChunkRecord, ChunkStore, JobStore, MemoryStore, StoreError};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use types::{ContentType, DisplayState, EmbeddingKind, JobStatus, StageKind};
pub use worker::{JobQueue, WorkerPool};
