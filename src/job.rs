//! The processing job model and its transition guards.
//!
//! A [`ProcessingJob`] is mutated exclusively through the guard methods here;
//! they enforce the status edges declared by [`JobStatus::can_transition_to`]
//! and keep `retry_count` monotonic and within budget. The stores re-check
//! terminal statuses on write, but the guards are the first line of defense.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorRecord;
use crate::types::{ContentType, DisplayState, JobStatus, StageKind};

#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    #[error("illegal status transition {from} -> {to}")]
    #[diagnostic(
        code(chunkforge::job::invalid_transition),
        help("Terminal statuses are never re-entered; check the caller's state machine.")
    )]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("retry budget exhausted: {retry_count} of {max_retries} re-attempts used")]
    #[diagnostic(code(chunkforge::job::retry_budget))]
    RetryBudgetExhausted { retry_count: u32, max_retries: u32 },

    #[error("stage update requires an active job, status is {status}")]
    #[diagnostic(code(chunkforge::job::not_processing))]
    NotProcessing { status: JobStatus },
}

/// One ingestion job for one source document.
#[derive(Clone, Debug)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content_type: ContentType,
    pub status: JobStatus,
    pub current_stage: Option<StageKind>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<ErrorRecord>,
    /// Set when the job succeeded but extraction produced no text at all.
    pub no_content: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(document_id: Uuid, content_type: ContentType, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            content_type,
            status: JobStatus::Pending,
            current_stage: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            no_content: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending -> processing`, taken when a worker picks the job up.
    pub fn begin_processing(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Processing)
    }

    /// Record entry into `stage`. Updates `current_stage` and the timestamp
    /// but never the status.
    pub fn advance_stage(&mut self, stage: StageKind) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::NotProcessing {
                status: self.status,
            });
        }
        self.current_stage = Some(stage);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Consume one unit of retry budget. Fails when the budget is already
    /// spent, so `retry_count` can never exceed `max_retries`.
    pub fn record_retry(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::NotProcessing {
                status: self.status,
            });
        }
        if self.retry_count >= self.max_retries {
            return Err(JobError::RetryBudgetExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `processing -> processed`; sets `completed_at`.
    pub fn finish(&mut self, no_content: bool) -> Result<(), JobError> {
        self.transition(JobStatus::Processed)?;
        self.no_content = no_content;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `processing -> error` with the failure recorded.
    pub fn fail(&mut self, error: ErrorRecord) -> Result<(), JobError> {
        self.transition(JobStatus::Error)?;
        self.last_error = Some(error);
        Ok(())
    }

    /// `pending|processing -> cancelled`, external signal only.
    pub fn cancel(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Cancelled)
    }

    /// Read-boundary snapshot consumed by status displays.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id,
            document_id: self.document_id,
            status: self.status,
            current_stage: self.current_stage,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            display: DisplayState::derive(
                self.status,
                self.current_stage,
                self.retry_count,
                self.max_retries,
            ),
            progress_percent: self.progress_percent(),
            no_content: self.no_content,
        }
    }

    fn progress_percent(&self) -> u8 {
        match self.status {
            JobStatus::Pending => 0,
            JobStatus::Processed => 100,
            JobStatus::Processing | JobStatus::Error | JobStatus::Cancelled => self
                .current_stage
                .map(|s| s.progress_weight())
                .unwrap_or(0),
        }
    }
}

/// The status read API payload: persisted fields plus the derived display
/// state and progress. Nothing here is stored beyond the base fields.
#[derive(Clone, Debug, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    pub current_stage: Option<StageKind>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub display: DisplayState,
    pub progress_percent: u8,
    pub no_content: bool,
}
