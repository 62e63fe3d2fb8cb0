//! Types for the download scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobError;

/// Errors returned by scheduler commands.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Registry error (validation, not found, conflict, storage).
    #[error(transparent)]
    Job(#[from] JobError),
}

impl SchedulerError {
    /// The underlying registry error.
    pub fn as_job_error(&self) -> &JobError {
        match self {
            SchedulerError::Job(e) => e,
        }
    }
}

/// A job currently holding a download slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDownload {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    /// Whether a cancellation was requested and not yet committed.
    pub cancelling: bool,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the scheduler is admitting jobs.
    pub running: bool,
    /// Configured concurrency bound.
    pub max_concurrent: usize,
    /// Jobs holding a slot.
    pub active: Vec<ActiveDownload>,
    /// Jobs waiting for a slot.
    pub queued_count: usize,
}
