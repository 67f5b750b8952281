//! SQLite-backed job and chunk storage.
//!
//! Database I/O only; row encoding lives in the persistence module. When the
//! `sqlite-migrations` feature is enabled (default), embedded migrations
//! (`sqlx::migrate!("./migrations")`) run on connect; disabling the feature
//! assumes external migration orchestration.
//!
//! Idempotent ingestion rides on the `documents.content_hash` unique index:
//! `find_or_create` inserts with `ON CONFLICT DO NOTHING` and the loser of a
//! concurrent race re-reads the winner's row inside the same transaction.
//! Chunk writes delete the prior set and insert the new one in a single
//! transaction, so readers never observe a partial set.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::job::{JobStatusView, ProcessingJob};
use crate::types::{ContentType, JobStatus};

use super::persistence::{PersistedChunk, PersistedJob};
use super::{
    ChunkRecord, ChunkStore, DocumentRecord, IngestOutcome, JobStore, NewDocument, StoreError,
};

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn backend(context: &str, e: sqlx::Error) -> StoreError {
    if is_unique_violation(&e) {
        return StoreError::Conflict {
            message: format!("{context}: {e}"),
        };
    }
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e.as_database_error().map(|d| d.kind()),
        Some(sqlx::error::ErrorKind::UniqueViolation)
    )
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `sqlite://chunkforge.db?mode=rwc`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("connect error: {e}"),
            })?;
        // Embedded migrations are idempotent; run them only when the feature
        // is enabled.
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(StoreError::Backend {
                    message: format!("migration failure: {e}"),
                });
            }
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord, StoreError> {
        let id: String = row.try_get("id").map_err(|e| backend("read document", e))?;
        let content_hash: String = row
            .try_get("content_hash")
            .map_err(|e| backend("read document", e))?;
        let origin: String = row
            .try_get("origin")
            .map_err(|e| backend("read document", e))?;
        let content_type: String = row
            .try_get("content_type")
            .map_err(|e| backend("read document", e))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| backend("read document", e))?;

        Ok(DocumentRecord {
            id: Uuid::parse_str(&id).map_err(|_| StoreError::Corrupt {
                message: format!("invalid document id: {id}"),
            })?,
            content_hash,
            origin,
            content_type: ContentType::parse(&content_type).ok_or_else(|| StoreError::Corrupt {
                message: format!("unknown content_type: {content_type}"),
            })?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|_| StoreError::Corrupt {
                    message: format!("invalid document created_at: {created_at}"),
                })?,
        })
    }

    fn job_from_row(row: &SqliteRow) -> Result<ProcessingJob, StoreError> {
        let persisted = PersistedJob {
            id: row.try_get("id").map_err(|e| backend("read job", e))?,
            document_id: row
                .try_get("document_id")
                .map_err(|e| backend("read job", e))?,
            content_type: row
                .try_get("content_type")
                .map_err(|e| backend("read job", e))?,
            status: row.try_get("status").map_err(|e| backend("read job", e))?,
            current_stage: row
                .try_get("current_stage")
                .map_err(|e| backend("read job", e))?,
            retry_count: row
                .try_get("retry_count")
                .map_err(|e| backend("read job", e))?,
            max_retries: row
                .try_get("max_retries")
                .map_err(|e| backend("read job", e))?,
            last_error_json: row
                .try_get("last_error_json")
                .map_err(|e| backend("read job", e))?,
            no_content: row
                .try_get("no_content")
                .map_err(|e| backend("read job", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| backend("read job", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| backend("read job", e))?,
            completed_at: row
                .try_get("completed_at")
                .map_err(|e| backend("read job", e))?,
        };
        ProcessingJob::try_from(persisted).map_err(StoreError::from)
    }

    fn chunk_from_row(row: &SqliteRow) -> Result<ChunkRecord, StoreError> {
        let persisted = PersistedChunk {
            id: row.try_get("id").map_err(|e| backend("read chunk", e))?,
            document_id: row
                .try_get("document_id")
                .map_err(|e| backend("read chunk", e))?,
            chunk_index: row
                .try_get("chunk_index")
                .map_err(|e| backend("read chunk", e))?,
            text: row.try_get("text").map_err(|e| backend("read chunk", e))?,
            token_count: row
                .try_get("token_count")
                .map_err(|e| backend("read chunk", e))?,
            embedding: row
                .try_get("embedding")
                .map_err(|e| backend("read chunk", e))?,
            embedding_kind: row
                .try_get("embedding_kind")
                .map_err(|e| backend("read chunk", e))?,
            media_embedding: row
                .try_get("media_embedding")
                .map_err(|e| backend("read chunk", e))?,
            metadata_json: row
                .try_get("metadata_json")
                .map_err(|e| backend("read chunk", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| backend("read chunk", e))?,
        };
        ChunkRecord::try_from(persisted).map_err(StoreError::from)
    }

    async fn latest_job_for_document(
        &self,
        document_id: &str,
    ) -> Result<Option<ProcessingJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, content_type, status, current_stage,
                   retry_count, max_retries, last_error_json, no_content,
                   created_at, updated_at, completed_at
            FROM jobs
            WHERE document_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| backend("select latest job", e))?;

        row.as_ref().map(Self::job_from_row).transpose()
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, doc), fields(content_hash = %doc.content_hash), err)]
    async fn find_or_create(
        &self,
        doc: NewDocument,
        max_retries: u32,
    ) -> Result<IngestOutcome, StoreError> {
        let document = DocumentRecord {
            id: Uuid::new_v4(),
            content_hash: doc.content_hash.clone(),
            origin: doc.origin.clone(),
            content_type: doc.content_type,
            created_at: chrono::Utc::now(),
        };
        let job = ProcessingJob::new(document.id, doc.content_type, max_retries);
        let persisted = PersistedJob::from(&job);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("tx begin", e))?;

        // The unique index on content_hash arbitrates concurrent submissions:
        // exactly one insert lands, everyone else reads the winner's row.
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (id, content_hash, origin, content_type, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.content_hash)
        .bind(&document.origin)
        .bind(document.content_type.as_str())
        .bind(document.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("insert document", e))?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(|e| backend("tx rollback", e))?;

            let row = sqlx::query(
                "SELECT id, content_hash, origin, content_type, created_at \
                 FROM documents WHERE content_hash = ?1",
            )
            .bind(&doc.content_hash)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| backend("select document", e))?;
            let existing = Self::document_from_row(&row)?;

            let existing_job = self
                .latest_job_for_document(&existing.id.to_string())
                .await?
                .ok_or_else(|| StoreError::Corrupt {
                    message: format!("document {} has no job", existing.id),
                })?;

            return Ok(IngestOutcome {
                document: existing,
                job: existing_job,
                created: false,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, document_id, content_type, status, current_stage,
                retry_count, max_retries, last_error_json, no_content,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&persisted.id)
        .bind(&persisted.document_id)
        .bind(&persisted.content_type)
        .bind(&persisted.status)
        .bind(&persisted.current_stage)
        .bind(persisted.retry_count)
        .bind(persisted.max_retries)
        .bind(&persisted.last_error_json)
        .bind(persisted.no_content)
        .bind(&persisted.created_at)
        .bind(&persisted.updated_at)
        .bind(&persisted.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("insert job", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;

        Ok(IngestOutcome {
            document,
            job,
            created: true,
        })
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, content_type, status, current_stage,
                   retry_count, max_retries, last_error_json, no_content,
                   created_at, updated_at, completed_at
            FROM jobs WHERE id = ?1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| backend("select job", e))?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, StoreError> {
        // One conditional write arbitrates concurrent claimants; the losers
        // match zero rows.
        let claimed = sqlx::query(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
        )
        .bind(job_id.to_string())
        .bind(JobStatus::Processing.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(JobStatus::Pending.as_str())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| backend("claim job", e))?
        .rows_affected();

        if claimed == 0 {
            return Ok(None);
        }
        self.get_job(job_id).await
    }

    async fn find_job_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<ProcessingJob>, StoreError> {
        let row = sqlx::query("SELECT id FROM documents WHERE content_hash = ?1")
            .bind(content_hash)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| backend("select document", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document_id: String = row
            .try_get("id")
            .map_err(|e| backend("read document", e))?;
        self.latest_job_for_document(&document_id).await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn update_job(&self, job: &ProcessingJob) -> Result<(), StoreError> {
        let persisted = PersistedJob::from(job);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("tx begin", e))?;

        // Read-check-write inside one transaction so a terminal row can never
        // be resurrected by a stale worker.
        let row = sqlx::query("SELECT status FROM jobs WHERE id = ?1")
            .bind(&persisted.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| backend("select job status", e))?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("job {}", job.id),
            })?;
        let stored_status: String = row
            .try_get("status")
            .map_err(|e| backend("read job status", e))?;
        let stored = JobStatus::parse(&stored_status).ok_or_else(|| StoreError::Corrupt {
            message: format!("unknown status: {stored_status}"),
        })?;

        if stored != job.status && (stored.is_terminal() || !stored.can_transition_to(job.status)) {
            return Err(StoreError::InvalidTransition {
                from: stored,
                to: job.status,
            });
        }

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?2,
                current_stage = ?3,
                retry_count = ?4,
                last_error_json = ?5,
                no_content = ?6,
                updated_at = ?7,
                completed_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&persisted.id)
        .bind(&persisted.status)
        .bind(&persisted.current_stage)
        .bind(persisted.retry_count)
        .bind(&persisted.last_error_json)
        .bind(persisted.no_content)
        .bind(&persisted.updated_at)
        .bind(&persisted.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("update job", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(())
    }

    async fn job_status(&self, document_id: Uuid) -> Result<Option<JobStatusView>, StoreError> {
        Ok(self
            .latest_job_for_document(&document_id.to_string())
            .await?
            .map(|j| j.status_view()))
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    #[instrument(skip(self, chunks), fields(document_id = %document_id, count = chunks.len()), err)]
    async fn store_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("tx begin", e))?;

        // Delete-then-insert in one transaction: a reprocessed document
        // replaces its chunk set, and a failed insert rolls the delete back.
        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete chunks", e))?;

        for chunk in &chunks {
            if chunk.document_id != document_id {
                return Err(StoreError::Conflict {
                    message: format!(
                        "chunk {} belongs to document {}, not {document_id}",
                        chunk.id, chunk.document_id
                    ),
                });
            }
            let persisted = PersistedChunk::from(chunk);
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, document_id, chunk_index, text, token_count,
                    embedding, embedding_kind, media_embedding, metadata_json,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&persisted.id)
            .bind(&persisted.document_id)
            .bind(persisted.chunk_index)
            .bind(&persisted.text)
            .bind(persisted.token_count)
            .bind(&persisted.embedding)
            .bind(&persisted.embedding_kind)
            .bind(&persisted.media_embedding)
            .bind(&persisted.metadata_json)
            .bind(&persisted.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("insert chunk", e))?;
        }

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(())
    }

    async fn chunks_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, token_count,
                   embedding, embedding_kind, media_embedding, metadata_json,
                   created_at
            FROM chunks
            WHERE document_id = ?1
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id.to_string())
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| backend("select chunks", e))?;

        rows.iter().map(Self::chunk_from_row).collect()
    }
}
