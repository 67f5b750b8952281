//! SQLite store behavior on a real database file: embedded migrations,
//! idempotent document creation, guarded status writes, and transactional
//! chunk replacement.

#![cfg(feature = "sqlite")]

use chunkforge::errors::ErrorRecord;
use chunkforge::store::{
    ChunkRecord, ChunkStore, JobStore, NewDocument, SqliteStore, StoreError,
};
use chunkforge::types::{ContentType, EmbeddingKind, JobStatus, StageKind};
use tempfile::TempDir;
use uuid::Uuid;

async fn open_store(dir: &TempDir) -> SqliteStore {
    let path = dir.path().join("chunkforge-test.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    SqliteStore::connect(&url).await.expect("connect and migrate")
}

fn new_document(hash: &str) -> NewDocument {
    NewDocument {
        content_hash: hash.into(),
        origin: format!("{hash}.txt"),
        content_type: ContentType::Document,
    }
}

fn chunk(document_id: Uuid, index: usize, text: &str) -> ChunkRecord {
    ChunkRecord::new(
        document_id,
        index,
        text,
        text.split_whitespace().count(),
        vec![0.25 * (index as f32 + 1.0); 8],
        EmbeddingKind::Text,
    )
}

#[tokio::test]
async fn find_or_create_is_idempotent_per_content_hash() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let first = store
        .find_or_create(new_document("abc123"), 3)
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.job.status, JobStatus::Pending);
    assert_eq!(first.job.max_retries, 3);

    // Same hash under a different origin resolves to the winner's row.
    let second = store
        .find_or_create(
            NewDocument {
                origin: "renamed.txt".into(),
                ..new_document("abc123")
            },
            3,
        )
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.document.id, first.document.id);
    assert_eq!(second.job.id, first.job.id);
    assert_eq!(second.document.origin, first.document.origin);

    let other = store
        .find_or_create(new_document("def456"), 3)
        .await
        .unwrap();
    assert!(other.created);
    assert_ne!(other.document.id, first.document.id);
}

#[tokio::test]
async fn job_updates_round_trip_through_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("roundtrip"), 3)
        .await
        .unwrap();

    let mut job = outcome.job;
    job.begin_processing().unwrap();
    job.advance_stage(StageKind::Downloading).unwrap();
    job.record_retry().unwrap();
    job.record_retry().unwrap();
    store.update_job(&job).await.unwrap();

    let loaded = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Processing);
    assert_eq!(loaded.current_stage, Some(StageKind::Downloading));
    assert_eq!(loaded.retry_count, 2);
    assert!(loaded.last_error.is_none());

    job.fail(ErrorRecord::msg("embedding backend unavailable")).unwrap();
    store.update_job(&job).await.unwrap();

    let failed = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(
        failed.last_error.as_ref().map(|e| e.message.as_str()),
        Some("embedding backend unavailable")
    );

    let by_hash = store
        .find_job_by_content_hash("roundtrip")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.id, job.id);
    assert_eq!(by_hash.status, JobStatus::Error);
}

#[tokio::test]
async fn terminal_rows_reject_resurrection() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("terminal"), 3)
        .await
        .unwrap();

    let mut job = outcome.job;
    job.begin_processing().unwrap();
    job.finish(false).unwrap();
    store.update_job(&job).await.unwrap();

    // A stale worker holding a pre-completion copy cannot write it back.
    let mut stale = job.clone();
    stale.status = JobStatus::Processing;
    stale.completed_at = None;
    let err = store.update_job(&stale).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Processed,
            to: JobStatus::Processing,
        }
    ));

    let stored = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn claims_are_granted_to_exactly_one_worker() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("claimable"), 3)
        .await
        .unwrap();

    // The conditional write admits one claimant; the stored row moves to
    // processing and every later claim matches nothing.
    let claimed = store.claim_job(outcome.job.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(store.claim_job(outcome.job.id).await.unwrap().is_none());

    let mut job = claimed;
    job.finish(false).unwrap();
    store.update_job(&job).await.unwrap();
    assert!(store.claim_job(job.id).await.unwrap().is_none());

    assert!(store.claim_job(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn updating_an_unknown_job_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("known"), 3)
        .await
        .unwrap();

    let mut ghost = outcome.job.clone();
    ghost.id = Uuid::new_v4();
    let err = store.update_job(&ghost).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn chunk_replacement_is_ordered_and_atomic() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("chunks"), 3)
        .await
        .unwrap();
    let document_id = outcome.document.id;

    // Out-of-order insert; reads come back ordered by chunk_index.
    store
        .store_chunks(
            document_id,
            vec![
                chunk(document_id, 2, "third piece"),
                chunk(document_id, 0, "first piece"),
                chunk(document_id, 1, "second piece"),
            ],
        )
        .await
        .unwrap();
    let stored = store.chunks_for_document(document_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    let indices: Vec<usize> = stored.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(stored[0].text, "first piece");

    // A replacement set with a duplicate index violates the unique constraint
    // and rolls back, leaving the prior set fully visible.
    let err = store
        .store_chunks(
            document_id,
            vec![
                chunk(document_id, 0, "replacement a"),
                chunk(document_id, 0, "replacement b"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    let after = store.chunks_for_document(document_id).await.unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].text, "first piece");

    // A clean replacement lands whole; an empty set clears the document.
    store
        .store_chunks(document_id, vec![chunk(document_id, 0, "fresh piece")])
        .await
        .unwrap();
    assert_eq!(store.chunks_for_document(document_id).await.unwrap().len(), 1);

    store.store_chunks(document_id, vec![]).await.unwrap();
    assert!(store
        .chunks_for_document(document_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn chunks_for_foreign_documents_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("owner"), 3)
        .await
        .unwrap();

    let err = store
        .store_chunks(outcome.document.id, vec![chunk(Uuid::new_v4(), 0, "stray")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
async fn embedding_blobs_survive_exactly() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let outcome = store
        .find_or_create(new_document("vectors"), 3)
        .await
        .unwrap();
    let document_id = outcome.document.id;

    let text_vector = vec![0.125_f32, -1.5, 3.25e-4, f32::MIN_POSITIVE, 1.0];
    let media_vector = vec![-0.75_f32, 2.0, 0.0, 9.5e6];
    let record = ChunkRecord::new(
        document_id,
        0,
        "segment transcript text",
        4,
        text_vector.clone(),
        EmbeddingKind::Text,
    )
    .with_media_embedding(media_vector.clone())
    .with_metadata(serde_json::json!({
        "structural_type": "video_segment",
        "segment_index": 0,
    }));

    store.store_chunks(document_id, vec![record]).await.unwrap();
    let stored = store.chunks_for_document(document_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].embedding, text_vector);
    assert_eq!(stored[0].media_embedding.as_deref(), Some(&media_vector[..]));
    assert_eq!(stored[0].metadata["structural_type"], "video_segment");
}
