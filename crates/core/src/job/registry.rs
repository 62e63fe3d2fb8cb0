//! Job registry: the single writer-of-record for job state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{ConflictReason, CreateJobRequest, JobError, JobStore};
use super::types::{derive_title, order_candidates, Candidate, Job, JobStatus};
use crate::events::EventBroadcaster;
use crate::metrics::{JOBS_CREATED, JOB_TRANSITIONS};

/// Default number of jobs returned by the history view.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Error recorded on jobs interrupted by a process restart.
pub const RESTART_ERROR: &str = "Server restarted during processing";

/// Compare-and-set rounds attempted by [`JobRegistry::update_with`].
const MAX_UPDATE_ROUNDS: usize = 16;

/// A partial update to a job record.
///
/// Unset fields are left untouched. A status change clears the output file
/// path and the error before the rest of the patch is applied.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<Option<u8>>,
    pub task: Option<String>,
    pub error: Option<Option<String>>,
    pub file_path: Option<Option<PathBuf>>,
    pub attempt_count: Option<u32>,
    pub candidate_index: Option<usize>,
    pub candidates: Option<Vec<Candidate>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: Option<u8>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(Some(path));
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    pub fn with_candidate_index(mut self, candidate_index: usize) -> Self {
        self.candidate_index = Some(candidate_index);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Applies the patch to `job`, enforcing the state machine and field invariants.
    pub fn apply(self, job: &mut Job) -> Result<(), JobError> {
        let mut status_changed = false;
        if let Some(next) = self.status {
            if next != job.status {
                if !job.status.can_transition_to(next) {
                    return Err(JobError::conflict(
                        job.id.clone(),
                        ConflictReason::IllegalTransition {
                            from: job.status,
                            to: next,
                        },
                    ));
                }
                job.status = next;
                job.file_path = None;
                job.error = None;
                status_changed = true;
            }
        }

        if let Some(progress) = self.progress {
            let progress = progress.map(|p| p.min(100));
            job.progress = if job.status == JobStatus::Downloading && !status_changed {
                match (job.progress, progress) {
                    (Some(old), Some(new)) => Some(old.max(new)),
                    (Some(old), None) => Some(old),
                    (None, new) => new,
                }
            } else {
                progress
            };
        }

        if let Some(task) = self.task {
            job.task = task;
        }
        if let Some(error) = self.error {
            job.error = error;
        }
        if let Some(file_path) = self.file_path {
            job.file_path = file_path;
        }
        if let Some(attempt_count) = self.attempt_count {
            job.attempt_count = attempt_count;
        }
        if let Some(candidate_index) = self.candidate_index {
            job.candidate_index = candidate_index;
        }
        if let Some(candidates) = self.candidates {
            job.candidates = order_candidates(candidates);
        }

        if job.file_path.is_some() != (job.status == JobStatus::Completed) {
            return Err(JobError::Validation(format!(
                "file path must be set exactly when completed (status {})",
                job.status
            )));
        }
        if job.error.is_some() != (job.status == JobStatus::Failed) {
            return Err(JobError::Validation(format!(
                "error must be set exactly when failed (status {})",
                job.status
            )));
        }
        Ok(())
    }
}

/// Authoritative registry of job records.
///
/// Every mutation is a compare-and-set against the record's version, and
/// every accepted mutation is published to the event broadcaster.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
    events: EventBroadcaster,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, events: EventBroadcaster) -> Self {
        Self { store, events }
    }

    /// The broadcaster accepted updates are published to.
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Validate a request and insert a new Queued job.
    pub fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        request.validate()?;

        let id = Uuid::new_v4().to_string();
        let title = match &request.name {
            Some(name) => name.trim().to_string(),
            None => derive_title(&request.source),
        };
        let candidates = if request.candidates.is_empty() {
            vec![Candidate::new(request.source.clone(), 0)]
        } else {
            order_candidates(request.candidates)
        };
        let now = Utc::now();

        let job = Job {
            id,
            source: request.source,
            name_override: request.name,
            title,
            content_type: request.content_type,
            year: request.year,
            episode: request.episode,
            candidates,
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
        };

        self.store.insert(&job)?;
        JOBS_CREATED.inc();
        info!(job_id = %job.id, title = %job.title, candidates = job.candidates.len(), "Job created");
        self.events.job_created(&job);
        Ok(job)
    }

    /// Get a job by ID.
    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .get(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Jobs, most recently created first.
    pub fn list(&self, limit: usize) -> Result<Vec<Job>, JobError> {
        self.store.list(limit)
    }

    /// Queued jobs in admission order.
    pub fn list_queued(&self) -> Result<Vec<Job>, JobError> {
        self.store.list_by_status(JobStatus::Queued)
    }

    /// Apply `patch` if the record is still at `expected_version`.
    pub fn update(&self, id: &str, expected_version: u64, patch: JobPatch) -> Result<Job, JobError> {
        let current = self.get(id)?;
        if current.version != expected_version {
            return Err(JobError::conflict(
                id,
                ConflictReason::StaleVersion {
                    expected: expected_version,
                    actual: current.version,
                },
            ));
        }
        self.commit(current, patch)
    }

    /// Read-modify-write loop: builds a patch from the latest record and
    /// retries on stale-version conflicts.
    ///
    /// Errors returned by `f` abort the loop unchanged.
    pub fn update_with<F>(&self, id: &str, mut f: F) -> Result<Job, JobError>
    where
        F: FnMut(&Job) -> Result<JobPatch, JobError>,
    {
        let mut last_err = None;
        for _ in 0..MAX_UPDATE_ROUNDS {
            let current = self.get(id)?;
            let patch = f(&current)?;
            match self.commit(current, patch) {
                Err(e) if e.is_stale_version() => {
                    debug!(job_id = %id, "Stale version, re-reading");
                    last_err = Some(e);
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| JobError::Database("update retries exhausted".into())))
    }

    fn commit(&self, current: Job, patch: JobPatch) -> Result<Job, JobError> {
        let mut next = current.clone();
        patch.apply(&mut next)?;
        next.version = current.version + 1;
        next.updated_at = Utc::now();

        self.store.compare_and_swap(current.version, &next)?;

        if current.status != next.status {
            JOB_TRANSITIONS
                .with_label_values(&[current.status.as_str(), next.status.as_str()])
                .inc();
            info!(
                job_id = %next.id,
                from = %current.status,
                to = %next.status,
                "Job status changed"
            );
        }
        self.events.job_updated(&next);
        Ok(next)
    }

    /// Remove a job that is not queued or downloading, and its output file.
    pub fn delete(&self, id: &str) -> Result<Job, JobError> {
        let mut last_err = None;
        for _ in 0..MAX_UPDATE_ROUNDS {
            let job = self.get(id)?;
            if job.status.is_active() {
                return Err(JobError::conflict(
                    id,
                    ConflictReason::Busy { status: job.status },
                ));
            }
            match self.store.delete(id, job.version) {
                Ok(()) => {
                    info!(job_id = %id, "Job deleted");
                    if let Some(path) = &job.file_path {
                        remove_output_file(path);
                    }
                    return Ok(job);
                }
                Err(e) if e.is_stale_version() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| JobError::Database("delete retries exhausted".into())))
    }

    /// Mark jobs left in Downloading by a previous process as Failed.
    pub fn recover_interrupted(&self) -> Result<usize, JobError> {
        let interrupted = self.store.list_by_status(JobStatus::Downloading)?;
        let mut recovered = 0;
        for job in interrupted {
            let result = self.update_with(&job.id, |current| {
                if current.status != JobStatus::Downloading {
                    return Err(JobError::conflict(
                        current.id.clone(),
                        ConflictReason::IllegalTransition {
                            from: current.status,
                            to: JobStatus::Failed,
                        },
                    ));
                }
                Ok(JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_task("Failed")
                    .with_error(RESTART_ERROR))
            });
            match result {
                Ok(_) => recovered += 1,
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        if recovered > 0 {
            warn!("Marked {} interrupted downloads as failed", recovered);
        }
        Ok(recovered)
    }
}

fn remove_output_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed output file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove output file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::JobEvent;
    use crate::job::{ContentType, SqliteJobStore};
    use tempfile::TempDir;

    fn registry() -> JobRegistry {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        JobRegistry::new(store, EventBroadcaster::new(64))
    }

    fn movie(source: &str) -> CreateJobRequest {
        CreateJobRequest::new(source, ContentType::Movie)
    }

    fn start(registry: &JobRegistry, job: &Job) -> Job {
        registry
            .update(
                &job.id,
                job.version,
                JobPatch::new()
                    .with_status(JobStatus::Downloading)
                    .with_progress(Some(0))
                    .with_task("Starting download..."),
            )
            .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/watch/1590407")).unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.title, "1590407");
        assert_eq!(job.progress, Some(0));
        assert_eq!(job.task, "Queued");
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.candidate_index, 0);
        assert_eq!(
            job.candidates,
            vec![Candidate::new("https://example.com/watch/1590407", 0)]
        );
    }

    #[test]
    fn test_create_uses_name_and_sorts_candidates() {
        let registry = registry();
        let job = registry
            .create(movie("https://example.com/watch/1").with_name(" Dune ").with_candidates(vec![
                Candidate::new("b", 5),
                Candidate::new("a", 1),
            ]))
            .unwrap();

        assert_eq!(job.title, "Dune");
        assert_eq!(job.candidates[0].endpoint, "a");
    }

    #[test]
    fn test_create_rejects_invalid_request() {
        let registry = registry();
        let err = registry.create(movie("")).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(registry.list(10).unwrap().is_empty());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = registry();
        assert!(matches!(registry.get("missing"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_update_rejects_stale_version() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();
        start(&registry, &job);

        let err = registry
            .update(&job.id, job.version, JobPatch::new().with_status(JobStatus::Cancelled))
            .unwrap_err();
        assert!(err.is_stale_version());
        assert_eq!(registry.get(&job.id).unwrap().status, JobStatus::Downloading);
    }

    #[test]
    fn test_update_rejects_illegal_transition() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();

        let err = registry
            .update(
                &job.id,
                job.version,
                JobPatch::new()
                    .with_status(JobStatus::Completed)
                    .with_file_path(PathBuf::from("/tmp/x.mp4")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::Conflict {
                reason: ConflictReason::IllegalTransition { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_update_enforces_file_path_and_error_invariants() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();
        let job = start(&registry, &job);

        let err = registry
            .update(&job.id, job.version, JobPatch::new().with_status(JobStatus::Completed))
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));

        let err = registry
            .update(&job.id, job.version, JobPatch::new().with_status(JobStatus::Failed))
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));

        let failed = registry
            .update(
                &job.id,
                job.version,
                JobPatch::new().with_status(JobStatus::Failed).with_error("boom"),
            )
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));

        // Leaving Failed clears the error.
        let queued = registry
            .update(&job.id, failed.version, JobPatch::new().with_status(JobStatus::Queued))
            .unwrap();
        assert!(queued.error.is_none());
    }

    #[test]
    fn test_progress_never_decreases_while_downloading() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();
        let job = start(&registry, &job);

        let job = registry
            .update(&job.id, job.version, JobPatch::new().with_progress(Some(40)))
            .unwrap();
        let job = registry
            .update(&job.id, job.version, JobPatch::new().with_progress(Some(10)))
            .unwrap();
        assert_eq!(job.progress, Some(40));

        let job = registry
            .update(&job.id, job.version, JobPatch::new().with_progress(None))
            .unwrap();
        assert_eq!(job.progress, Some(40));
        assert_eq!(job.version, 4);
    }

    #[test]
    fn test_update_with_retries_after_concurrent_write() {
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();

        let mut rounds = 0;
        let updated = registry
            .update_with(&job.id, |current| {
                rounds += 1;
                if rounds == 1 {
                    // Simulate another writer landing between read and write.
                    registry
                        .update(&current.id, current.version, JobPatch::new().with_task("Other"))
                        .unwrap();
                }
                Ok(JobPatch::new().with_task("Mine"))
            })
            .unwrap();

        assert_eq!(rounds, 2);
        assert_eq!(updated.task, "Mine");
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn test_every_accepted_update_emits_event() {
        let registry = registry();
        let mut sub = registry.events().subscribe();

        let job = registry.create(movie("https://example.com/a")).unwrap();
        start(&registry, &job);
        let _ = registry.update(&job.id, 0, JobPatch::new().with_task("stale"));

        assert!(matches!(sub.try_recv(), Some(JobEvent::Created { .. })));
        match sub.try_recv() {
            Some(JobEvent::Updated { status, task, .. }) => {
                assert_eq!(status, JobStatus::Downloading);
                assert_eq!(task, "Starting download...");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_delete_rules_and_file_cleanup() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        let job = registry.create(movie("https://example.com/a")).unwrap();

        let err = registry.delete(&job.id).unwrap_err();
        assert!(matches!(
            err,
            JobError::Conflict {
                reason: ConflictReason::Busy { .. },
                ..
            }
        ));

        let output = dir.path().join("a.mp4");
        std::fs::write(&output, b"data").unwrap();
        let job = start(&registry, &job);
        registry
            .update(
                &job.id,
                job.version,
                JobPatch::new()
                    .with_status(JobStatus::Completed)
                    .with_progress(Some(100))
                    .with_file_path(output.clone()),
            )
            .unwrap();

        registry.delete(&job.id).unwrap();
        assert!(!output.exists());
        assert!(matches!(registry.get(&job.id), Err(JobError::NotFound(_))));
        assert!(matches!(registry.delete(&job.id), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_recover_interrupted() {
        let registry = registry();
        let stuck = registry.create(movie("https://example.com/a")).unwrap();
        let waiting = registry.create(movie("https://example.com/b")).unwrap();
        start(&registry, &stuck);

        assert_eq!(registry.recover_interrupted().unwrap(), 1);

        let stuck = registry.get(&stuck.id).unwrap();
        assert_eq!(stuck.status, JobStatus::Failed);
        assert_eq!(stuck.error.as_deref(), Some(RESTART_ERROR));
        assert_eq!(registry.get(&waiting.id).unwrap().status, JobStatus::Queued);
    }
}
