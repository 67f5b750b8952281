//! In-memory store backing unit/integration tests and embedded use.
//!
//! Same contract as the SQLite backend: find-or-create is atomic under one
//! lock, chunk writes replace the document's set wholesale, and terminal
//! statuses are write-protected.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::job::{JobStatusView, ProcessingJob};
use crate::types::JobStatus;

use super::{
    ChunkRecord, ChunkStore, DocumentRecord, IngestOutcome, JobStore, NewDocument, StoreError,
};

#[derive(Default)]
struct MemoryInner {
    documents: FxHashMap<String, DocumentRecord>,
    jobs: FxHashMap<Uuid, ProcessingJob>,
    /// Jobs per document, in creation order; the last entry is the latest.
    jobs_by_document: FxHashMap<Uuid, Vec<Uuid>>,
    chunks: FxHashMap<Uuid, Vec<ChunkRecord>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents, for idempotency assertions in tests.
    pub async fn document_count(&self) -> usize {
        self.inner.lock().await.documents.len()
    }

    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

impl MemoryInner {
    fn latest_job(&self, document_id: Uuid) -> Option<&ProcessingJob> {
        self.jobs_by_document
            .get(&document_id)?
            .last()
            .and_then(|id| self.jobs.get(id))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn find_or_create(
        &self,
        doc: NewDocument,
        max_retries: u32,
    ) -> Result<IngestOutcome, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.documents.get(&doc.content_hash).cloned() {
            let job = inner
                .latest_job(existing.id)
                .cloned()
                .ok_or_else(|| StoreError::Corrupt {
                    message: format!("document {} has no job", existing.id),
                })?;
            return Ok(IngestOutcome {
                document: existing,
                job,
                created: false,
            });
        }

        let document = DocumentRecord {
            id: Uuid::new_v4(),
            content_hash: doc.content_hash.clone(),
            origin: doc.origin,
            content_type: doc.content_type,
            created_at: chrono::Utc::now(),
        };
        let job = ProcessingJob::new(document.id, doc.content_type, max_retries);
        inner.documents.insert(doc.content_hash, document.clone());
        inner
            .jobs_by_document
            .entry(document.id)
            .or_default()
            .push(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(IngestOutcome {
            document,
            job,
            created: true,
        })
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&job_id).cloned())
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        // Pending -> processing under the store lock, so exactly one claimant
        // ever sees the pending row.
        job.status = JobStatus::Processing;
        job.updated_at = chrono::Utc::now();
        Ok(Some(job.clone()))
    }

    async fn find_job_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<ProcessingJob>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(document) = inner.documents.get(content_hash) else {
            return Ok(None);
        };
        Ok(inner.latest_job(document.id).cloned())
    }

    async fn update_job(&self, job: &ProcessingJob) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner.jobs.get(&job.id).ok_or_else(|| StoreError::NotFound {
            what: format!("job {}", job.id),
        })?;
        if stored.status != job.status
            && (stored.status.is_terminal() || !stored.status.can_transition_to(job.status))
        {
            return Err(StoreError::InvalidTransition {
                from: stored.status,
                to: job.status,
            });
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn job_status(&self, document_id: Uuid) -> Result<Option<JobStatusView>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.latest_job(document_id).map(|j| j.status_view()))
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn store_chunks(
        &self,
        document_id: Uuid,
        mut chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError> {
        // Validate before touching stored state so a failure leaves the prior
        // set fully visible.
        let mut seen = rustc_hash::FxHashSet::default();
        for chunk in &chunks {
            if chunk.document_id != document_id {
                return Err(StoreError::Conflict {
                    message: format!(
                        "chunk {} belongs to document {}, not {document_id}",
                        chunk.id, chunk.document_id
                    ),
                });
            }
            if !seen.insert(chunk.chunk_index) {
                return Err(StoreError::Conflict {
                    message: format!("duplicate chunk_index {}", chunk.chunk_index),
                });
            }
        }
        chunks.sort_by_key(|c| c.chunk_index);
        self.inner.lock().await.chunks.insert(document_id, chunks);
        Ok(())
    }

    async fn chunks_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .chunks
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentType, EmbeddingKind, JobStatus};

    fn new_doc(hash: &str) -> NewDocument {
        NewDocument {
            content_hash: hash.to_string(),
            origin: "mem://test".to_string(),
            content_type: ContentType::Document,
        }
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_hash() {
        let store = MemoryStore::new();
        let first = store.find_or_create(new_doc("abc"), 3).await.unwrap();
        let second = store.find_or_create(new_doc("abc"), 3).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.document.id, second.document.id);
        assert_eq!(first.job.id, second.job.id);
        assert_eq!(store.document_count().await, 1);
        assert_eq!(store.job_count().await, 1);

        let third = store.find_or_create(new_doc("other"), 3).await.unwrap();
        assert!(third.created);
        assert_eq!(store.document_count().await, 2);
    }

    #[tokio::test]
    async fn claim_is_granted_exactly_once() {
        let store = MemoryStore::new();
        let outcome = store.find_or_create(new_doc("abc"), 3).await.unwrap();

        let claimed = store.claim_job(outcome.job.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(store.claim_job(outcome.job.id).await.unwrap().is_none());

        // Terminal jobs are never claimable again.
        let mut job = claimed;
        job.finish(false).unwrap();
        store.update_job(&job).await.unwrap();
        assert!(store.claim_job(job.id).await.unwrap().is_none());

        assert!(store.claim_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_writes_are_rejected() {
        let store = MemoryStore::new();
        let outcome = store.find_or_create(new_doc("abc"), 3).await.unwrap();
        let mut job = outcome.job;
        job.begin_processing().unwrap();
        store.update_job(&job).await.unwrap();
        job.fail(crate::errors::ErrorRecord::msg("boom")).unwrap();
        store.update_job(&job).await.unwrap();

        // A stale copy trying to resurrect the job must be refused.
        let mut stale = store.get_job(job.id).await.unwrap().unwrap();
        stale.status = JobStatus::Processing;
        assert!(matches!(
            store.update_job(&stale).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn chunk_replace_is_all_or_nothing() {
        let store = MemoryStore::new();
        let document_id = Uuid::new_v4();
        let good = vec![
            ChunkRecord::new(document_id, 0, "a", 1, vec![0.1], EmbeddingKind::Text),
            ChunkRecord::new(document_id, 1, "b", 1, vec![0.2], EmbeddingKind::Text),
        ];
        store.store_chunks(document_id, good).await.unwrap();
        assert_eq!(store.chunks_for_document(document_id).await.unwrap().len(), 2);

        // Duplicate index: the write fails and the prior set stays visible.
        let bad = vec![
            ChunkRecord::new(document_id, 0, "x", 1, vec![0.3], EmbeddingKind::Text),
            ChunkRecord::new(document_id, 0, "y", 1, vec![0.4], EmbeddingKind::Text),
        ];
        assert!(store.store_chunks(document_id, bad).await.is_err());
        let chunks = store.chunks_for_document(document_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a");

        // Reprocessing replaces, never appends.
        let replacement = vec![ChunkRecord::new(
            document_id,
            0,
            "fresh",
            1,
            vec![0.5],
            EmbeddingKind::Text,
        )];
        store.store_chunks(document_id, replacement).await.unwrap();
        let chunks = store.chunks_for_document(document_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "fresh");
    }
}
