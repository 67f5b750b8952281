//! The job orchestrator: stage walk, retry loop, and the classification
//! boundary.
//!
//! One orchestrator instance drives any number of jobs. Each job walks its
//! content type's stage sequence (download, type-specific extraction,
//! chunk+embed, store); `current_stage` and timestamps move per stage while
//! `status` stays `processing`. A retryable stage failure consumes one unit
//! of the job's global retry budget and re-runs the same stage from scratch
//! after an exponential backoff; a non-retryable failure (or a spent budget)
//! moves the job terminally to `error`. Terminal statuses guarantee no
//! further stage execution.
//!
//! Cancellation is a flag observed at stage boundaries only; a stage that has
//! started runs to its own completion or failure.

use std::future::Future;
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::chunker::{ChunkDraft, Chunker, ChunkerConfig};
use crate::config::PipelineConfig;
use crate::document::{StructuredDocument, Unit, UnitKind};
use crate::embed::EmbeddingProvider;
use crate::errors::{Classify, ErrorRecord, StageError, classify};
use crate::events::PipelineEvent;
use crate::extract::{
    DocumentExtractor, ExtractError, Extraction, Extractor, ImageExtractor, MediaExtractor,
    SegmentExtraction,
};
use crate::fetch::{FetchError, FetchedSource, Fetcher, content_address, url_address};
use crate::job::{JobError, JobStatusView, ProcessingJob};
use crate::sniff;
use crate::store::{ChunkRecord, ChunkStore, DocumentRecord, JobStore, NewDocument, StoreError};
use crate::tokenizer::TokenCounter;
use crate::transcribe::Transcriber;
use crate::types::{ContentType, EmbeddingKind, StageKind};

#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not determine a content type for `{origin}`")]
    #[diagnostic(
        code(chunkforge::orchestrator::unknown_content_type),
        help(
            "The bytes matched no known signature and the name carried no usable extension; pass an explicit content type on the submission."
        )
    )]
    UnknownContentType { origin: String },
}

/// What a submission carries: either a URL to download or bytes that already
/// landed in the input store.
#[derive(Clone, Debug)]
pub enum SourcePayload {
    Url(String),
    Bytes {
        filename: Option<String>,
        bytes: Vec<u8>,
    },
}

/// One ingestion request.
#[derive(Clone, Debug)]
pub struct Submission {
    pub payload: SourcePayload,
    /// Explicit override; otherwise the type is sniffed (bytes) or guessed
    /// from the extension and verified after download (URLs).
    pub content_type: Option<ContentType>,
    /// Total media duration when the caller knows it; drives segmentation.
    pub declared_duration: Option<Duration>,
}

impl Submission {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            payload: SourcePayload::Url(url.into()),
            content_type: None,
            declared_duration: None,
        }
    }

    pub fn bytes(filename: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            payload: SourcePayload::Bytes { filename, bytes },
            content_type: None,
            declared_duration: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    #[must_use]
    pub fn with_declared_duration(mut self, duration: Duration) -> Self {
        self.declared_duration = Some(duration);
        self
    }
}

/// A submitted job, ready for a worker: the persisted pair plus the payload
/// the stages consume.
#[derive(Clone, Debug)]
pub struct QueuedJob {
    pub job: ProcessingJob,
    pub document: DocumentRecord,
    pub payload: SourcePayload,
    pub declared_duration: Option<Duration>,
    /// False when this submission found an existing job for the same content.
    pub created: bool,
}

/// Outcome of one stage run inside `process`.
enum StageRun<T> {
    Completed(T),
    /// The job reached a terminal status (failed or cancelled); stop walking.
    Terminal,
}

pub struct Orchestrator {
    config: PipelineConfig,
    counter: Arc<TokenCounter>,
    fetcher: Fetcher,
    embedder: Arc<dyn EmbeddingProvider>,
    transcriber: Arc<dyn Transcriber>,
    jobs: Arc<dyn JobStore>,
    chunks: Arc<dyn ChunkStore>,
    events: flume::Sender<PipelineEvent>,
    cancellations: Mutex<FxHashSet<Uuid>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        jobs: Arc<dyn JobStore>,
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self, OrchestratorError> {
        let fetcher = Fetcher::new(config.request_timeout)?;
        Ok(Self {
            config,
            counter: TokenCounter::shared(),
            fetcher,
            embedder,
            transcriber,
            jobs,
            chunks,
            // Dangling by default; events go nowhere until a bus is attached.
            events: flume::unbounded().0,
            cancellations: Mutex::new(FxHashSet::default()),
        })
    }

    /// Route pipeline events to an event bus sender.
    #[must_use]
    pub fn with_event_sender(mut self, sender: flume::Sender<PipelineEvent>) -> Self {
        self.events = sender;
        self
    }

    #[must_use]
    pub fn with_token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    fn emit(&self, event: PipelineEvent) {
        // Observability only; a missing or full listener never blocks a job.
        let _ = self.events.send(event);
    }

    /// Register a submission: resolve the content address and content type,
    /// then find-or-create the job/document pair. Submitting the same content
    /// twice yields the same pair with `created == false`.
    #[instrument(skip(self, submission), err)]
    pub async fn submit(&self, submission: Submission) -> Result<QueuedJob, OrchestratorError> {
        let (origin, content_hash, detected) = match &submission.payload {
            SourcePayload::Url(url) => (
                url.clone(),
                url_address(url),
                url_filename(url).and_then(sniff::from_extension),
            ),
            SourcePayload::Bytes { filename, bytes } => {
                let hash = content_address(bytes);
                let origin = filename
                    .clone()
                    .unwrap_or_else(|| format!("bytes://{}", &hash[..12]));
                let detected = sniff::detect(bytes, filename.as_deref());
                (origin, hash, detected)
            }
        };

        let content_type = submission.content_type.or(detected).ok_or_else(|| {
            OrchestratorError::UnknownContentType {
                origin: origin.clone(),
            }
        })?;

        let outcome = self
            .jobs
            .find_or_create(
                NewDocument {
                    content_hash,
                    origin,
                    content_type,
                },
                self.config.max_retries,
            )
            .await?;

        if outcome.created {
            self.emit(PipelineEvent::JobCreated {
                job_id: outcome.job.id,
                document_id: outcome.document.id,
                content_type,
            });
        } else {
            debug!(
                job_id = %outcome.job.id,
                status = %outcome.job.status,
                "submission matched an existing content address"
            );
        }

        Ok(QueuedJob {
            job: outcome.job,
            document: outcome.document,
            payload: submission.payload,
            declared_duration: submission.declared_duration,
            created: outcome.created,
        })
    }

    /// Submit and process in one call.
    pub async fn ingest(
        &self,
        submission: Submission,
    ) -> Result<ProcessingJob, OrchestratorError> {
        let queued = self.submit(submission).await?;
        self.process(queued).await
    }

    /// Drive one job end-to-end. Jobs that are not `pending` in the store (a
    /// duplicate submission, a job another worker claimed, or an
    /// already-terminal job) are returned untouched.
    #[instrument(skip(self, queued), fields(job_id = %queued.job.id, content_type = %queued.job.content_type), err)]
    pub async fn process(&self, queued: QueuedJob) -> Result<ProcessingJob, OrchestratorError> {
        // The claim is the store's conditional pending -> processing write,
        // so concurrent callers holding handles to the same job resolve to
        // exactly one worker; everyone else gets the stored row back. Terminal
        // statuses execute zero further stages.
        let mut job = match self.jobs.claim_job(queued.job.id).await? {
            Some(claimed) => claimed,
            None => {
                let current = self
                    .jobs
                    .get_job(queued.job.id)
                    .await?
                    .unwrap_or_else(|| queued.job.clone());
                if current.status.is_terminal() {
                    self.clear_cancellation(current.id);
                }
                return Ok(current);
            }
        };
        if self.take_cancellation(job.id) {
            job.cancel()?;
            self.jobs.update_job(&job).await?;
            self.emit(PipelineEvent::JobCancelled { job_id: job.id });
            return Ok(job);
        }

        let document_id = queued.document.id;

        let source = match self
            .run_stage(&mut job, StageKind::Downloading, || self.acquire(&queued))
            .await?
        {
            StageRun::Completed(source) => source,
            StageRun::Terminal => return Ok(job),
        };

        let records = match job.content_type {
            ContentType::Document => {
                let doc = match self
                    .run_stage(&mut job, StageKind::ExtractingText, || {
                        self.extract_text(&source)
                    })
                    .await?
                {
                    StageRun::Completed(doc) => doc,
                    StageRun::Terminal => return Ok(job),
                };
                match self
                    .run_stage(&mut job, StageKind::GeneratingEmbeddings, || {
                        self.embed_document(document_id, &doc)
                    })
                    .await?
                {
                    StageRun::Completed(records) => records,
                    StageRun::Terminal => return Ok(job),
                }
            }
            ContentType::Image => {
                match self
                    .run_stage(&mut job, StageKind::GeneratingEmbeddings, || {
                        self.embed_image(document_id, &source)
                    })
                    .await?
                {
                    StageRun::Completed(records) => records,
                    StageRun::Terminal => return Ok(job),
                }
            }
            ContentType::Video | ContentType::Audio => {
                let visual = job.content_type == ContentType::Video;
                let extractor = MediaExtractor::new(
                    self.transcriber.clone(),
                    self.config.segment_duration,
                    visual,
                )
                .with_declared_duration(queued.declared_duration);
                let segments = match self
                    .run_stage(&mut job, StageKind::Transcribing, || {
                        self.transcribe_media(&extractor, &source)
                    })
                    .await?
                {
                    StageRun::Completed(segments) => segments,
                    StageRun::Terminal => return Ok(job),
                };
                match self
                    .run_stage(&mut job, StageKind::GeneratingEmbeddings, || {
                        self.embed_media(document_id, &segments)
                    })
                    .await?
                {
                    StageRun::Completed(records) => records,
                    StageRun::Terminal => return Ok(job),
                }
            }
        };

        let chunk_count = records.len();
        match self
            .run_stage(&mut job, StageKind::Storing, || {
                self.store(document_id, &records)
            })
            .await?
        {
            StageRun::Completed(()) => {}
            StageRun::Terminal => return Ok(job),
        }

        job.finish(chunk_count == 0)?;
        self.jobs.update_job(&job).await?;
        // A flag raised too late to be observed has nothing left to cancel.
        self.clear_cancellation(job.id);
        self.emit(PipelineEvent::JobProcessed {
            job_id: job.id,
            chunk_count,
            no_content: job.no_content,
        });
        Ok(job)
    }

    /// Flag `job_id` for cancellation. A job still `pending` in the store is
    /// claimed and cancelled here; a `processing` job keeps the flag and
    /// observes it at its next stage boundary. Flags for terminal or unknown
    /// jobs are dropped immediately.
    #[instrument(skip(self), err)]
    pub async fn cancel_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<JobStatusView>, OrchestratorError> {
        self.cancellations.lock().insert(job_id);
        let job = match self.jobs.claim_job(job_id).await? {
            // Claiming first means no worker can race this store-side cancel.
            Some(mut claimed) => {
                claimed.cancel()?;
                self.jobs.update_job(&claimed).await?;
                self.clear_cancellation(job_id);
                self.emit(PipelineEvent::JobCancelled { job_id });
                claimed
            }
            None => {
                let Some(current) = self.jobs.get_job(job_id).await? else {
                    self.clear_cancellation(job_id);
                    return Ok(None);
                };
                if current.status.is_terminal() {
                    self.clear_cancellation(job_id);
                }
                current
            }
        };
        Ok(Some(job.status_view()))
    }

    /// Status read API: latest job for a document, as a display view with the
    /// derived state and progress percentage.
    pub async fn job_status(
        &self,
        document_id: Uuid,
    ) -> Result<Option<JobStatusView>, OrchestratorError> {
        Ok(self.jobs.job_status(document_id).await?)
    }

    /// Latest job for a content address, if the content was ever submitted.
    pub async fn job_for_content(
        &self,
        content_hash: &str,
    ) -> Result<Option<ProcessingJob>, OrchestratorError> {
        Ok(self.jobs.find_job_by_content_hash(content_hash).await?)
    }

    fn take_cancellation(&self, job_id: Uuid) -> bool {
        self.cancellations.lock().remove(&job_id)
    }

    fn clear_cancellation(&self, job_id: Uuid) {
        self.cancellations.lock().remove(&job_id);
    }

    /// Cancellation flags raised but not yet observed or resolved.
    pub fn pending_cancellations(&self) -> usize {
        self.cancellations.lock().len()
    }

    /// Run one stage with the retry loop around it. `attempt` must be
    /// re-runnable from scratch; a retried stage overwrites, never appends.
    async fn run_stage<T, F, Fut>(
        &self,
        job: &mut ProcessingJob,
        stage: StageKind,
        attempt: F,
    ) -> Result<StageRun<T>, OrchestratorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        if self.take_cancellation(job.id) {
            job.cancel()?;
            self.jobs.update_job(job).await?;
            self.emit(PipelineEvent::JobCancelled { job_id: job.id });
            return Ok(StageRun::Terminal);
        }

        job.advance_stage(stage)?;
        self.jobs.update_job(job).await?;

        loop {
            self.emit(PipelineEvent::StageStarted {
                job_id: job.id,
                stage,
            });
            let started = tokio::time::Instant::now();

            match attempt().await {
                Ok(value) => {
                    self.emit(PipelineEvent::StageCompleted {
                        job_id: job.id,
                        stage,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    return Ok(StageRun::Completed(value));
                }
                Err(error) => {
                    let retryable = classify(&error).is_retryable();
                    if !retryable || job.retry_count >= job.max_retries {
                        let message = error.to_string();
                        warn!(
                            job_id = %job.id, %stage, retryable,
                            retry_count = job.retry_count, %message,
                            "stage failed terminally"
                        );
                        job.fail(ErrorRecord::from_stage(stage, &error))?;
                        self.jobs.update_job(job).await?;
                        self.clear_cancellation(job.id);
                        self.emit(PipelineEvent::JobFailed {
                            job_id: job.id,
                            stage,
                            message,
                        });
                        return Ok(StageRun::Terminal);
                    }

                    job.record_retry()?;
                    self.jobs.update_job(job).await?;
                    let delay = self.backoff_delay(job.retry_count, error.retry_after());
                    debug!(
                        job_id = %job.id, %stage,
                        attempt = job.retry_count, delay_ms = delay.as_millis() as u64,
                        "retryable stage failure, backing off"
                    );
                    self.emit(PipelineEvent::RetryScheduled {
                        job_id: job.id,
                        stage,
                        attempt: job.retry_count,
                        max_retries: job.max_retries,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;

                    // Re-attempting the stage is a boundary too.
                    if self.take_cancellation(job.id) {
                        job.cancel()?;
                        self.jobs.update_job(job).await?;
                        self.emit(PipelineEvent::JobCancelled { job_id: job.id });
                        return Ok(StageRun::Terminal);
                    }
                }
            }
        }
    }

    /// Delay before re-attempt number `attempt`: `base * 2^(attempt-1)` with
    /// the configured jitter fraction, floored by any server-provided hint.
    fn backoff_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exponential = self.config.backoff_base.saturating_mul(1u32 << shift);
        let jitter = self.config.backoff_jitter;
        let delay = if jitter > 0.0 {
            let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
            exponential.mul_f64(factor.max(0.0))
        } else {
            exponential
        };
        match hint {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }

    /// Download stage: fetch the URL or re-materialize the submitted bytes.
    /// URL-triggered jobs sniff the downloaded bytes here; content that
    /// matches no supported format (or contradicts the job's type) is
    /// terminal.
    async fn acquire(&self, queued: &QueuedJob) -> Result<FetchedSource, StageError> {
        match &queued.payload {
            SourcePayload::Bytes { bytes, .. } => Ok(FetchedSource::from_bytes(
                queued.document.origin.clone(),
                bytes.clone(),
            )),
            SourcePayload::Url(url) => {
                let source = self.fetcher.fetch(url).await.map_err(StageError::from)?;
                match sniff::detect(&source.bytes, source.filename()) {
                    Some(found) if found == queued.job.content_type => Ok(source),
                    Some(found) => Err(ExtractError::Malformed {
                        reason: format!(
                            "downloaded content sniffed as {found}, job expects {}",
                            queued.job.content_type
                        ),
                    }
                    .into()),
                    None => Err(ExtractError::Malformed {
                        reason: "downloaded content matches no supported format".into(),
                    }
                    .into()),
                }
            }
        }
    }

    async fn extract_text(
        &self,
        source: &FetchedSource,
    ) -> Result<StructuredDocument, StageError> {
        match DocumentExtractor::new().extract(source).await? {
            Extraction::Text(doc) => Ok(doc),
            _ => Err(ExtractError::Malformed {
                reason: "document extraction produced non-text output".into(),
            }
            .into()),
        }
    }

    async fn transcribe_media<T: Transcriber>(
        &self,
        extractor: &MediaExtractor<T>,
        source: &FetchedSource,
    ) -> Result<Vec<SegmentExtraction>, StageError> {
        match extractor.extract(source).await? {
            Extraction::Media { segments } => Ok(segments),
            _ => Err(ExtractError::Malformed {
                reason: "media extraction produced non-segment output".into(),
            }
            .into()),
        }
    }

    fn chunker(&self) -> Chunker<'_> {
        Chunker::new(
            &self.counter,
            &self.config.text_model,
            ChunkerConfig {
                max_tokens: self.config.max_tokens,
                overlap_tokens: self.config.chunk_overlap_tokens,
            },
        )
    }

    /// Chunk+embed for text documents: one text embedding per draft, indices
    /// assigned in draft order.
    async fn embed_document(
        &self,
        document_id: Uuid,
        doc: &StructuredDocument,
    ) -> Result<Vec<ChunkRecord>, StageError> {
        let drafts = self.chunker().chunk(doc)?;
        let mut records = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let embedding = self.embedder.embed_text(&draft.text).await?;
            records.push(
                ChunkRecord::new(
                    document_id,
                    records.len(),
                    draft.text.clone(),
                    draft.token_count,
                    embedding,
                    EmbeddingKind::Text,
                )
                .with_metadata(draft_metadata(draft, None)),
            );
        }
        Ok(records)
    }

    /// One image becomes one multimodal chunk; the bytes are validated first
    /// so a renamed binary fails before any service call.
    async fn embed_image(
        &self,
        document_id: Uuid,
        source: &FetchedSource,
    ) -> Result<Vec<ChunkRecord>, StageError> {
        let Extraction::Image { bytes } = ImageExtractor::new().extract(source).await? else {
            return Err(ExtractError::Malformed {
                reason: "image extraction produced non-image output".into(),
            }
            .into());
        };
        let embedding = self.embedder.embed_multimodal(&bytes, None).await?;
        Ok(vec![
            ChunkRecord::new(document_id, 0, "", 0, embedding, EmbeddingKind::Multimodal)
                .with_metadata(json!({
                    "structural_type": "image",
                    "origin": source.origin,
                })),
        ])
    }

    /// Chunk+embed for media: one multimodal embedding per visual segment,
    /// shared bit-identically by every text chunk built from that segment's
    /// transcript. Audio segments carry text embeddings only.
    async fn embed_media(
        &self,
        document_id: Uuid,
        segments: &[SegmentExtraction],
    ) -> Result<Vec<ChunkRecord>, StageError> {
        let chunker = self.chunker();
        let mut records: Vec<ChunkRecord> = Vec::new();

        for segment in segments {
            let media_embedding = if segment.visual {
                Some(
                    self.embedder
                        .embed_multimodal(
                            &segment.segment.bytes,
                            segment.transcript.context.as_deref(),
                        )
                        .await?,
                )
            } else {
                None
            };

            let mut text = segment.transcript.text.trim().to_string();
            if let Some(context) = segment
                .transcript
                .context
                .as_deref()
                .filter(|c| !c.trim().is_empty())
            {
                if !text.is_empty() {
                    text.push_str("\n\n");
                }
                text.push_str(context.trim());
            }

            let kind = if segment.visual {
                UnitKind::VideoSegment
            } else {
                UnitKind::AudioSegment
            };

            if text.is_empty() {
                // Nothing was said; a visual segment still contributes its
                // multimodal vector as a chunk of its own.
                if let Some(embedding) = media_embedding {
                    records.push(
                        ChunkRecord::new(
                            document_id,
                            records.len(),
                            "",
                            0,
                            embedding,
                            EmbeddingKind::Multimodal,
                        )
                        .with_metadata(json!({
                            "structural_type": kind.as_str(),
                            "span": segment.segment.span,
                            "segment_index": segment.segment.index,
                        })),
                    );
                }
                continue;
            }

            let mut doc = StructuredDocument::new();
            doc.push(Unit::new(kind, text, segment.segment.span));
            for draft in chunker.chunk(&doc)? {
                let embedding = self.embedder.embed_text(&draft.text).await?;
                let mut record = ChunkRecord::new(
                    document_id,
                    records.len(),
                    draft.text.clone(),
                    draft.token_count,
                    embedding,
                    EmbeddingKind::Text,
                )
                .with_metadata(draft_metadata(&draft, Some(segment.segment.index)));
                if let Some(media) = &media_embedding {
                    record = record.with_media_embedding(media.clone());
                }
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn store(
        &self,
        document_id: Uuid,
        records: &[ChunkRecord],
    ) -> Result<(), StageError> {
        self.chunks
            .store_chunks(document_id, records.to_vec())
            .await
            .map_err(StageError::from)
    }
}

fn draft_metadata(draft: &ChunkDraft, segment_index: Option<usize>) -> serde_json::Value {
    let mut metadata = json!({
        "structural_type": draft.kind.as_str(),
        "span": draft.span,
        "force_split": draft.force_split,
    });
    if let Some(heading) = &draft.heading {
        metadata["heading"] = json!(heading);
    }
    if let Some(index) = segment_index {
        metadata["segment_index"] = json!(index);
    }
    metadata
}

fn url_filename(url: &str) -> Option<&str> {
    let tail = url.rsplit('/').next()?;
    let tail = tail.split('?').next().unwrap_or(tail);
    (!tail.is_empty()).then_some(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbeddingProvider;
    use crate::store::MemoryStore;
    use crate::transcribe::MockTranscriber;

    fn orchestrator(config: PipelineConfig) -> Orchestrator {
        let store = Arc::new(MemoryStore::new());
        Orchestrator::new(
            config,
            store.clone(),
            store,
            Arc::new(MockEmbeddingProvider::new(8, 16)),
            Arc::new(MockTranscriber::new("words")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn backoff_doubles_per_attempt_without_jitter() {
        let orchestrator = orchestrator(
            PipelineConfig::from_env().with_backoff(Duration::from_secs(1), 0.0),
        );
        assert_eq!(orchestrator.backoff_delay(1, None), Duration::from_secs(1));
        assert_eq!(orchestrator.backoff_delay(2, None), Duration::from_secs(2));
        assert_eq!(orchestrator.backoff_delay(3, None), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn rate_limit_hint_floors_the_delay() {
        let orchestrator = orchestrator(
            PipelineConfig::from_env().with_backoff(Duration::from_secs(1), 0.0),
        );
        // A hint above the exponential delay wins; a smaller one does not.
        assert_eq!(
            orchestrator.backoff_delay(1, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            orchestrator.backoff_delay(3, Some(Duration::from_secs(2))),
            Duration::from_secs(4)
        );
    }

    #[tokio::test]
    async fn jitter_stays_within_the_fraction() {
        let orchestrator = orchestrator(
            PipelineConfig::from_env().with_backoff(Duration::from_secs(1), 0.1),
        );
        for _ in 0..50 {
            let delay = orchestrator.backoff_delay(2, None);
            assert!(delay >= Duration::from_millis(1800));
            assert!(delay <= Duration::from_millis(2200));
        }
    }

    #[tokio::test]
    async fn unsniffable_bytes_are_rejected_at_submit() {
        let orchestrator = orchestrator(PipelineConfig::from_env());
        let err = orchestrator
            .submit(Submission::bytes(None, vec![0u8, 159, 146, 150]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::UnknownContentType { .. }
        ));
    }

    #[tokio::test]
    async fn text_bytes_sniff_as_document() {
        let orchestrator = orchestrator(PipelineConfig::from_env());
        let queued = orchestrator
            .submit(Submission::bytes(
                Some("notes.txt".into()),
                b"plain prose".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(queued.job.content_type, ContentType::Document);
        assert!(queued.created);
    }

    #[test]
    fn url_filename_strips_query() {
        assert_eq!(url_filename("https://h/a/b.pdf?sig=1"), Some("b.pdf"));
        assert_eq!(url_filename("https://h/"), None);
    }
}
