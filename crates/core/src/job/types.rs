//! Core job data types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Title used when neither a name override nor a usable source segment exists.
pub const UNKNOWN_TITLE: &str = "Unknown";

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a download job.
///
/// ```text
/// Queued -> Downloading -> { Completed, Failed, Cancelled }
/// Queued -> Cancelled
/// Failed | Completed -> Queued   (explicit retry)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Downloading,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Returns the status as a string (for storage and filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a status previously produced by [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Returns true if no work is pending for a job in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if the job is waiting for or occupying a download slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Downloading)
    }

    /// Returns true if a retry command is accepted from this status.
    pub fn can_retry(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Completed)
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Failed, Queued)
                | (Completed, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Content description
// ============================================================================

/// Kind of content a job acquires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Movie,
    Episode,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Episode => "episode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(ContentType::Movie),
            "episode" => Some(ContentType::Episode),
            _ => None,
        }
    }
}

/// Season/episode numbers for episodic content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpisodeNumber {
    /// Season number (0 for specials).
    pub season: u32,
    /// Episode number within the season, starting at 1.
    pub episode: u32,
}

impl EpisodeNumber {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }
}

/// One mirror/variant option for a job.
///
/// Candidates are tried in ascending `rank`; equal ranks keep submission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    /// Mirror endpoint: an absolute URL, or a path relative to the job's source.
    pub endpoint: String,
    /// Priority rank (lower = tried earlier).
    #[serde(default)]
    pub rank: u32,
}

impl Candidate {
    pub fn new(endpoint: impl Into<String>, rank: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            rank,
        }
    }
}

/// Sorts candidates by rank, keeping submission order for equal ranks.
pub fn order_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| c.rank);
    candidates
}

// ============================================================================
// Job
// ============================================================================

/// A request to acquire a single piece of content, tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier (UUID).
    pub id: String,

    /// Reference to the content page/stream the job was submitted with.
    pub source: String,

    /// Name supplied by the submitter, overriding the derived title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,

    /// Display title.
    pub title: String,

    /// Movie or episode.
    pub content_type: ContentType,

    /// Release year (movies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,

    /// Season/episode numbers (episodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeNumber>,

    /// Mirrors in the order they will be attempted.
    pub candidates: Vec<Candidate>,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Percentage 0-100, or `None` while indeterminate.
    pub progress: Option<u8>,

    /// Human-readable description of the current step.
    pub task: String,

    /// Failure message. Set if and only if status is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Output file. Set if and only if status is `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Candidates started during the current attempt.
    pub attempt_count: u32,

    /// Index into `candidates` of the mirror currently (or last) in use.
    pub candidate_index: usize,

    /// Optimistic concurrency token, bumped on every accepted update.
    pub version: u64,
}

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^A-Za-z0-9 ._()\-]+"#).unwrap());
static REPEATED_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Replaces characters that are unsafe in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = UNSAFE_FILE_CHARS.replace_all(name, "_");
    let cleaned = REPEATED_SPACE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim().trim_matches('.');
    if cleaned.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Derives a display title from the last non-empty path segment of a source reference.
pub fn derive_title(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or_default();
    let without_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);

    // The first segment is the host when a scheme was present.
    let mut segments = without_scheme.split('/').filter(|s| !s.trim().is_empty());
    if without_query.contains("://") {
        segments.next();
    }

    segments
        .last()
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string())
}

impl Job {
    /// File name (without extension) used for this job's output.
    pub fn output_stem(&self) -> String {
        let mut name = sanitize_file_name(&self.title);
        match (self.content_type, self.episode, self.year) {
            (ContentType::Episode, Some(ep), _) => {
                name.push_str(&format!(" S{:02}E{:02}", ep.season, ep.episode));
            }
            (ContentType::Movie, _, Some(year)) => {
                name.push_str(&format!(" ({})", year));
            }
            _ => {}
        }
        let short_id: String = self.id.chars().take(8).collect();
        format!("{}-{}", name, short_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(title: &str, content_type: ContentType) -> Job {
        let now = Utc::now();
        Job {
            id: "0123456789abcdef".to_string(),
            source: "https://example.com/watch/1".to_string(),
            name_override: None,
            title: title.to_string(),
            content_type,
            year: None,
            episode: None,
            candidates: vec![],
            status: JobStatus::Queued,
            progress: Some(0),
            task: "Queued".to_string(),
            error: None,
            file_path: None,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            candidate_index: 0,
            version: 0,
        }
    }

    #[test]
    fn test_terminal_and_active_partition() {
        for status in JobStatus::ALL {
            assert_ne!(status.is_terminal(), status.is_active(), "{}", status);
        }
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Downloading));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Downloading.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Queued));
        assert!(Completed.can_transition_to(Queued));

        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Downloading.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Downloading));
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("importing"), None);
    }

    #[test]
    fn test_order_candidates_is_stable() {
        let ordered = order_candidates(vec![
            Candidate::new("c", 2),
            Candidate::new("a", 1),
            Candidate::new("b", 1),
        ]);
        let endpoints: Vec<_> = ordered.iter().map(|c| c.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("https://example.com/watch/1590407"), "1590407");
        assert_eq!(derive_title("https://example.com/movie/dune/?t=1"), "dune");
        assert_eq!(derive_title("https://example.com/"), UNKNOWN_TITLE);
        assert_eq!(derive_title("1590407"), "1590407");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Dune: Part Two"), "Dune_ Part Two");
        assert_eq!(sanitize_file_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_file_name("  ..  "), UNKNOWN_TITLE);
    }

    #[test]
    fn test_output_stem_for_movie_and_episode() {
        let mut movie = job("Dune", ContentType::Movie);
        movie.year = Some(2021);
        assert_eq!(movie.output_stem(), "Dune (2021)-01234567");

        let mut episode = job("The Show", ContentType::Episode);
        episode.episode = Some(EpisodeNumber::new(1, 2));
        assert_eq!(episode.output_stem(), "The Show S01E02-01234567");
    }
}
