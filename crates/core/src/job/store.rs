//! Job storage trait, request and error types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Candidate, ContentType, EpisodeNumber, Job, JobStatus};

/// Why a write was rejected as conflicting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The record changed since it was read.
    StaleVersion { expected: u64, actual: u64 },
    /// The state machine does not allow this transition.
    IllegalTransition { from: JobStatus, to: JobStatus },
    /// The operation is not allowed while the job is queued or downloading.
    Busy { status: JobStatus },
    /// A cancellation was already requested.
    AlreadyCancelling,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::StaleVersion { expected, actual } => write!(
                f,
                "stale version (expected {}, found {})",
                expected, actual
            ),
            ConflictReason::IllegalTransition { from, to } => {
                write!(f, "cannot move from {} to {}", from, to)
            }
            ConflictReason::Busy { status } => write!(f, "job is {}", status),
            ConflictReason::AlreadyCancelling => f.write_str("cancellation already requested"),
        }
    }
}

/// Error type for job registry operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed job request or patch.
    #[error("validation error: {0}")]
    Validation(String),

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Illegal transition or stale version.
    #[error("conflict on job {id}: {reason}")]
    Conflict { id: String, reason: ConflictReason },

    /// Storage backend error.
    #[error("database error: {0}")]
    Database(String),
}

impl JobError {
    pub fn conflict(id: impl Into<String>, reason: ConflictReason) -> Self {
        JobError::Conflict {
            id: id.into(),
            reason,
        }
    }

    /// Returns true for any `Conflict`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, JobError::Conflict { .. })
    }

    /// Returns true if re-reading the record and retrying may succeed.
    pub fn is_stale_version(&self) -> bool {
        matches!(
            self,
            JobError::Conflict {
                reason: ConflictReason::StaleVersion { .. },
                ..
            }
        )
    }
}

/// Request to create a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Content page or stream reference.
    pub source: String,
    /// Optional display name overriding the derived title.
    #[serde(default)]
    pub name: Option<String>,
    /// Movie or episode.
    pub content_type: ContentType,
    /// Release year (movies only).
    #[serde(default)]
    pub year: Option<u32>,
    /// Season/episode numbers (episodes only, required).
    #[serde(default)]
    pub episode: Option<EpisodeNumber>,
    /// Mirrors to try. Empty means "the source itself".
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl CreateJobRequest {
    pub fn new(source: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            source: source.into(),
            name: None,
            content_type,
            year: None,
            episode: None,
            candidates: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_year(mut self, year: u32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.episode = Some(EpisodeNumber::new(season, episode));
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Checks the request before it is admitted to the registry.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.source.trim().is_empty() {
            return Err(JobError::Validation("source must not be empty".into()));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(JobError::Validation("name must not be blank".into()));
            }
        }
        match (self.content_type, self.episode) {
            (ContentType::Episode, None) => {
                return Err(JobError::Validation(
                    "episode content requires season and episode numbers".into(),
                ));
            }
            (ContentType::Episode, Some(ep)) if ep.episode == 0 => {
                return Err(JobError::Validation("episode number starts at 1".into()));
            }
            (ContentType::Movie, Some(_)) => {
                return Err(JobError::Validation(
                    "movies cannot carry episode numbers".into(),
                ));
            }
            _ => {}
        }
        if !self.candidates.is_empty() {
            validate_candidates(&self.candidates)?;
        }
        Ok(())
    }
}

/// Checks a candidate list: non-empty, non-blank and unique endpoints.
pub fn validate_candidates(candidates: &[Candidate]) -> Result<(), JobError> {
    if candidates.is_empty() {
        return Err(JobError::Validation("at least one candidate is required".into()));
    }
    let mut seen = HashSet::new();
    for candidate in candidates {
        let endpoint = candidate.endpoint.trim();
        if endpoint.is_empty() {
            return Err(JobError::Validation(
                "candidate endpoint must not be empty".into(),
            ));
        }
        if !seen.insert(endpoint) {
            return Err(JobError::Validation(format!(
                "duplicate candidate endpoint: {}",
                endpoint
            )));
        }
    }
    Ok(())
}

/// Storage backend for job records.
///
/// The only write primitive besides insert/delete is an atomic compare-and-set
/// keyed on the record's version.
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    fn insert(&self, job: &Job) -> Result<(), JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// List jobs, most recently created first.
    fn list(&self, limit: usize) -> Result<Vec<Job>, JobError>;

    /// List jobs in a status, oldest first (creation time, then insertion order).
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobError>;

    /// Replace the stored record with `job` if its version still equals `expected_version`.
    ///
    /// Fails with `Conflict` (stale version) if another writer got there first,
    /// or `NotFound` if the record is gone.
    fn compare_and_swap(&self, expected_version: u64, job: &Job) -> Result<(), JobError>;

    /// Delete a job if its version still equals `expected_version`.
    fn delete(&self, id: &str, expected_version: u64) -> Result<(), JobError>;
}
