//! Types for the fallback resolver.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::Progress;
use crate::job::Candidate;

/// Everything the resolver needs to acquire one job.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub job_id: String,
    /// Source reference the job was submitted with.
    pub source: String,
    /// Candidates in attempt order.
    pub candidates: Vec<Candidate>,
    /// Output path without extension.
    pub destination: PathBuf,
}

/// Stage at which a candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Capture,
    Transfer,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStage::Capture => "capture",
            AttemptStage::Transfer => "transfer",
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded soft failure of one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Zero-based index into the candidate list.
    pub candidate_index: usize,
    pub endpoint: String,
    pub stage: AttemptStage,
    pub reason: String,
}

/// Progress events sent from the resolver to the job's orchestrator.
///
/// Indices are zero-based; `total` is the number of candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverEvent {
    /// Capture is starting on a candidate.
    CandidateStarted {
        index: usize,
        total: usize,
        endpoint: String,
    },
    /// A candidate soft-failed and was given up.
    CandidateSoftFailure { record: AttemptRecord, total: usize },
    /// Capture succeeded, transfer is starting.
    TransferStarted { index: usize, total: usize },
    /// A transfer soft-failed and will be retried on the same candidate.
    TransferRetry {
        index: usize,
        total: usize,
        /// Attempt about to start (2..=max_attempts).
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    /// Transfer progress.
    Progress(Progress),
}

/// Successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Index of the candidate that delivered the file.
    pub candidate_index: usize,
    pub file_path: PathBuf,
    /// Soft failures of the candidates tried before the winner.
    pub soft_failures: Vec<AttemptRecord>,
}

/// Terminal resolution failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// Capture reported the content unavailable. `index` is zero-based.
    #[error("mirror {} reported content unavailable: {reason}", .index + 1)]
    CaptureHardFailure { index: usize, reason: String },

    /// Transfer failed unrecoverably.
    #[error("transfer from mirror {} failed: {reason}", .index + 1)]
    TransferHardFailure { index: usize, reason: String },

    /// Every candidate soft-failed.
    #[error("all {attempted} mirrors failed (last error: {})", last_reason(.failures))]
    AllMirrorsExhausted {
        attempted: usize,
        failures: Vec<AttemptRecord>,
    },

    /// Cancellation was observed.
    #[error("cancelled")]
    Cancelled,
}

fn last_reason(failures: &[AttemptRecord]) -> &str {
    failures
        .last()
        .map(|f| f.reason.as_str())
        .unwrap_or("no candidates")
}
