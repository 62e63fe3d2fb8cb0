//! Job records, storage and the registry that owns them.

mod registry;
mod sqlite_store;
mod store;
mod types;

pub use registry::{JobPatch, JobRegistry, DEFAULT_LIST_LIMIT, RESTART_ERROR};
pub use sqlite_store::SqliteJobStore;
pub use store::{validate_candidates, ConflictReason, CreateJobRequest, JobError, JobStore};
pub use types::{
    derive_title, order_candidates, sanitize_file_name, Candidate, ContentType, EpisodeNumber,
    Job, JobStatus, UNKNOWN_TITLE,
};
