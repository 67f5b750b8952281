//! Serde-friendly persisted shapes for the SQLite backend.
//!
//! Explicit row models decoupled from the in-memory types, with conversion
//! logic localized here so the backend code stays lean. Embeddings are stored
//! as little-endian f32 blobs. This module performs no I/O.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorRecord;
use crate::job::ProcessingJob;
use crate::store::{ChunkRecord, StoreError};
use crate::types::{ContentType, EmbeddingKind, JobStatus, StageKind};

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("unrecognized {field} value `{value}`")]
    #[diagnostic(
        code(chunkforge::persistence::field),
        help("The stored vocabulary drifted from the code; check schema versioning.")
    )]
    Field { field: &'static str, value: String },

    #[error("invalid persisted uuid for {field}: {value}")]
    #[diagnostic(code(chunkforge::persistence::uuid))]
    Uuid { field: &'static str, value: String },

    #[error("invalid persisted timestamp for {field}: {value}")]
    #[diagnostic(code(chunkforge::persistence::timestamp))]
    Timestamp { field: &'static str, value: String },

    #[error("embedding blob length {len} is not a multiple of 4")]
    #[diagnostic(code(chunkforge::persistence::blob))]
    BlobLength { len: usize },

    #[error("JSON error for {field}: {source}")]
    #[diagnostic(code(chunkforge::persistence::serde))]
    Serde {
        field: &'static str,
        source: serde_json::Error,
    },
}

impl From<PersistenceError> for StoreError {
    fn from(e: PersistenceError) -> Self {
        StoreError::Corrupt {
            message: e.to_string(),
        }
    }
}

/// Row shape of the `jobs` table.
#[derive(Clone, Debug)]
pub struct PersistedJob {
    pub id: String,
    pub document_id: String,
    pub content_type: String,
    pub status: String,
    pub current_stage: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error_json: Option<String>,
    pub no_content: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl From<&ProcessingJob> for PersistedJob {
    fn from(job: &ProcessingJob) -> Self {
        Self {
            id: job.id.to_string(),
            document_id: job.document_id.to_string(),
            content_type: job.content_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            current_stage: job.current_stage.map(|s| s.as_str().to_string()),
            retry_count: job.retry_count as i64,
            max_retries: job.max_retries as i64,
            last_error_json: job
                .last_error
                .as_ref()
                .and_then(|e| serde_json::to_string(e).ok()),
            no_content: job.no_content as i64,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl TryFrom<PersistedJob> for ProcessingJob {
    type Error = PersistenceError;

    fn try_from(row: PersistedJob) -> Result<Self, Self::Error> {
        let last_error: Option<ErrorRecord> = row
            .last_error_json
            .as_deref()
            .map(|json| {
                serde_json::from_str(json).map_err(|source| PersistenceError::Serde {
                    field: "last_error_json",
                    source,
                })
            })
            .transpose()?;

        Ok(ProcessingJob {
            id: parse_uuid("id", &row.id)?,
            document_id: parse_uuid("document_id", &row.document_id)?,
            content_type: ContentType::parse(&row.content_type).ok_or_else(|| {
                PersistenceError::Field {
                    field: "content_type",
                    value: row.content_type.clone(),
                }
            })?,
            status: JobStatus::parse(&row.status).ok_or_else(|| PersistenceError::Field {
                field: "status",
                value: row.status.clone(),
            })?,
            current_stage: row
                .current_stage
                .as_deref()
                .map(|s| {
                    StageKind::parse(s).ok_or_else(|| PersistenceError::Field {
                        field: "current_stage",
                        value: s.to_string(),
                    })
                })
                .transpose()?,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            last_error,
            no_content: row.no_content != 0,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(|t| parse_timestamp("completed_at", t))
                .transpose()?,
        })
    }
}

/// Row shape of the `chunks` table.
#[derive(Clone, Debug)]
pub struct PersistedChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
    pub embedding: Vec<u8>,
    pub embedding_kind: String,
    pub media_embedding: Option<Vec<u8>>,
    pub metadata_json: String,
    pub created_at: String,
}

impl From<&ChunkRecord> for PersistedChunk {
    fn from(chunk: &ChunkRecord) -> Self {
        Self {
            id: chunk.id.to_string(),
            document_id: chunk.document_id.to_string(),
            chunk_index: chunk.chunk_index as i64,
            text: chunk.text.clone(),
            token_count: chunk.token_count as i64,
            embedding: encode_embedding(&chunk.embedding),
            embedding_kind: chunk.embedding_kind.as_str().to_string(),
            media_embedding: chunk.media_embedding.as_deref().map(encode_embedding),
            metadata_json: chunk.metadata.to_string(),
            created_at: chunk.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedChunk> for ChunkRecord {
    type Error = PersistenceError;

    fn try_from(row: PersistedChunk) -> Result<Self, Self::Error> {
        Ok(ChunkRecord {
            id: parse_uuid("id", &row.id)?,
            document_id: parse_uuid("document_id", &row.document_id)?,
            chunk_index: row.chunk_index as usize,
            text: row.text,
            token_count: row.token_count as usize,
            embedding: decode_embedding(&row.embedding)?,
            embedding_kind: EmbeddingKind::parse(&row.embedding_kind).ok_or_else(|| {
                PersistenceError::Field {
                    field: "embedding_kind",
                    value: row.embedding_kind.clone(),
                }
            })?,
            media_embedding: row
                .media_embedding
                .as_deref()
                .map(decode_embedding)
                .transpose()?,
            metadata: serde_json::from_str(&row.metadata_json).map_err(|source| {
                PersistenceError::Serde {
                    field: "metadata_json",
                    source,
                }
            })?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
        })
    }
}

/// Little-endian f32 blob encoding for embedding vectors.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, PersistenceError> {
    if blob.len() % 4 != 0 {
        return Err(PersistenceError::BlobLength { len: blob.len() });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(value).map_err(|_| PersistenceError::Uuid {
        field,
        value: value.to_string(),
    })
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| PersistenceError::Timestamp {
            field,
            value: value.to_string(),
        })
}
