//! Types for the job orchestrator.

use thiserror::Error;

use crate::job::{JobError, JobStatus};

/// Errors that can occur while driving a job.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The job is not in the status the runner expects.
    #[error("invalid job state: expected {expected}, got {actual}")]
    InvalidState {
        expected: JobStatus,
        actual: JobStatus,
    },

    /// Registry error.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Task texts shown while a job is processed.
pub(crate) mod task {
    pub const QUEUED: &str = "Queued";
    pub const STARTING: &str = "Starting download...";
    pub const RETRYING: &str = "Retrying...";
    pub const COMPLETED: &str = "Download completed";
    pub const FAILED: &str = "Failed";
    pub const CANCELLED: &str = "Cancelled";

    /// `index` is zero-based.
    pub fn trying(index: usize, total: usize) -> String {
        format!("Trying mirror {}/{}", index + 1, total)
    }

    pub fn mirror_failed(index: usize, total: usize) -> String {
        if index + 1 < total {
            format!(
                "Mirror {}/{} failed, retrying mirror {}/{}",
                index + 1,
                total,
                index + 2,
                total
            )
        } else {
            format!("Mirror {}/{} failed", index + 1, total)
        }
    }

    pub fn downloading(index: usize, total: usize) -> String {
        format!("Downloading (mirror {}/{})", index + 1, total)
    }

    /// `attempt` is the transfer attempt about to start (2 for the first retry).
    pub fn transfer_retry(attempt: u32, max_attempts: u32, index: usize, total: usize) -> String {
        format!(
            "Transfer interrupted, retry {}/{} on mirror {}/{}",
            attempt.saturating_sub(1),
            max_attempts.saturating_sub(1),
            index + 1,
            total
        )
    }
}
