//! # Job Model
//!
//! The central entity of the service: a tracked unit of work from
//! submitted input to produced subtitle file (or failure). Jobs are
//! created by the processing endpoint, mutated exclusively by their worker
//! task through the store's merge API, and read by any number of
//! concurrent status queries.
//!
//! ## State machine:
//! ```text
//! pending ──→ processing ──→ completed
//!    │             │──────→ failed
//!    │             └──────→ cancelled
//!    ├──→ failed      (setup fails before work starts)
//!    └──→ cancelled   (user cancels while queued)
//! ```
//! `completed`, `failed`, and `cancelled` are terminal: nothing mutates a
//! terminal job, ever.

pub mod store;
pub mod worker;

use crate::pipeline::{Language, ModelKind};
use crate::subtitle::SubtitleMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub use store::JobStore;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    ///
    /// The success path goes through `processing`; the only shortcut is a
    /// job failing or being cancelled before real work starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable processing configuration captured at job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub model: ModelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    pub mode: SubtitleMode,
}

/// A tracked transcription job.
///
/// `progress` is authoritative only while the job is non-terminal; once
/// terminal it is 100 (`completed`) or frozen at its last value. `error`
/// is present only for `failed`, `output_file` only for `completed`.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: Uuid,
    pub file_id: String,
    #[serde(flatten)]
    pub config: JobConfig,
    pub status: JobStatus,
    pub progress: f32,
    pub status_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub output_file: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(file_id: String, config: JobConfig) -> Self {
        let status_message = if config.model.is_finetune() {
            "Checking model... (first-time download ~1.5 GB)".to_string()
        } else {
            "Preparing to transcribe...".to_string()
        };

        Self {
            id: Uuid::new_v4(),
            file_id,
            config,
            status: JobStatus::Pending,
            progress: 0.0,
            status_message,
            error: None,
            output_file: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Partial update merged atomically into a stored job by its worker.
///
/// Every field is optional; absent fields leave the stored value alone.
/// See [`store::JobStore::apply`] for the merge rules.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub status_message: Option<String>,
    pub error: Option<String>,
    pub output_file: Option<PathBuf>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: f32) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_output_file(mut self, path: PathBuf) -> Self {
        self.output_file = Some(path);
        self
    }
}
