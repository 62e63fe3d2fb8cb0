//! Download scheduler implementation.
//!
//! Bounds the number of concurrently running jobs and admits Queued jobs FIFO
//! by creation time. Every admission decision, and every cancel, runs inside
//! one critical section guarded by the active-job map lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{
    validate_candidates, Candidate, ConflictReason, CreateJobRequest, Job, JobError, JobPatch,
    JobRegistry, JobStatus,
};
use crate::orchestrator::{task, JobRunner};

use super::config::SchedulerConfig;
use super::types::{ActiveDownload, SchedulerError, SchedulerStatus};

/// A job holding a download slot.
struct ActiveJob {
    /// Distinguishes successive runs of the same job id.
    generation: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    runner: JobRunner,
    active: Mutex<HashMap<String, ActiveJob>>,
    next_generation: AtomicU64,
    running: AtomicBool,
}

/// The command surface of the engine: submit, retry, cancel and delete jobs.
#[derive(Clone)]
pub struct DownloadScheduler {
    inner: Arc<SchedulerInner>,
}

impl DownloadScheduler {
    /// Create a new scheduler. Nothing is admitted until [`DownloadScheduler::start`].
    pub fn new(config: SchedulerConfig, runner: JobRunner) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                runner,
                active: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    fn registry(&self) -> &JobRegistry {
        self.inner.runner.registry()
    }

    /// Recover interrupted jobs and start admitting.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return Ok(());
        }

        info!(
            "Starting download scheduler (max {} concurrent)",
            self.inner.config.max_concurrent_downloads
        );
        self.registry().recover_interrupted()?;
        self.inner.admit_pending();
        Ok(())
    }

    /// Stop admitting, interrupt every active job and wait for them to settle.
    ///
    /// Interrupted jobs end Failed and can be retried after a restart.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping download scheduler");
        self.inner.runner.shutdown();

        let handles: Vec<JoinHandle<()>> = {
            let mut active = self.inner.lock_active();
            active.values_mut().filter_map(|a| a.handle.take()).collect()
        };
        let count = handles.len();
        join_all(handles).await;

        info!("Download scheduler stopped ({} jobs interrupted)", count);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Create a job and admit it if a slot is free.
    pub fn submit(&self, request: CreateJobRequest) -> Result<Job, SchedulerError> {
        let job = self.registry().create(request)?;
        self.inner.admit_pending();
        Ok(self.registry().get(&job.id)?)
    }

    /// Requeue a Failed or Completed job, optionally with new candidates.
    pub fn retry(&self, id: &str, candidates: Option<Vec<Candidate>>) -> Result<Job, SchedulerError> {
        if let Some(candidates) = &candidates {
            validate_candidates(candidates)?;
        }

        self.registry().update_with(id, |job| {
            if !job.status.can_retry() {
                let reason = if job.status.is_active() {
                    ConflictReason::Busy { status: job.status }
                } else {
                    ConflictReason::IllegalTransition {
                        from: job.status,
                        to: JobStatus::Queued,
                    }
                };
                return Err(JobError::conflict(job.id.clone(), reason));
            }

            let mut patch = JobPatch::new()
                .with_status(JobStatus::Queued)
                .with_progress(Some(0))
                .with_task(task::RETRYING)
                .with_attempt_count(0)
                .with_candidate_index(0);
            if let Some(candidates) = &candidates {
                patch = patch.with_candidates(candidates.clone());
            }
            Ok(patch)
        })?;
        info!("Job {} requeued for retry", id);

        self.inner.admit_pending();
        Ok(self.registry().get(id)?)
    }

    /// Cancel a job.
    ///
    /// Queued jobs are cancelled immediately. For a running job the
    /// cancellation is only requested here; the job's runner commits it once
    /// the adapters stop or the grace period runs out.
    pub fn cancel(&self, id: &str) -> Result<Job, SchedulerError> {
        let active = self.inner.lock_active();

        if let Some(entry) = active.get(id) {
            let job = self.registry().get(id)?;
            if job.status == JobStatus::Downloading {
                if entry.cancel.is_cancelled() {
                    return Err(JobError::conflict(id, ConflictReason::AlreadyCancelling).into());
                }
                entry.cancel.cancel();
                info!("Cancellation requested for job {}", id);
                return Ok(job);
            }
            // The runner already committed a terminal status; the update below conflicts.
        }

        // Not running here: commit directly. Holding the lock keeps admission out.
        let job = self.registry().update_with(id, |job| {
            if !job.status.can_transition_to(JobStatus::Cancelled) {
                return Err(JobError::conflict(
                    job.id.clone(),
                    ConflictReason::IllegalTransition {
                        from: job.status,
                        to: JobStatus::Cancelled,
                    },
                ));
            }
            Ok(JobPatch::new()
                .with_status(JobStatus::Cancelled)
                .with_task(task::CANCELLED))
        })?;
        drop(active);

        info!("Job {} cancelled", id);
        Ok(job)
    }

    /// Delete a finished job and its output file.
    pub fn delete(&self, id: &str) -> Result<Job, SchedulerError> {
        Ok(self.registry().delete(id)?)
    }

    pub fn get(&self, id: &str) -> Result<Job, SchedulerError> {
        Ok(self.registry().get(id)?)
    }

    /// Job history, most recent first.
    pub fn list(&self, limit: usize) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.registry().list(limit)?)
    }

    pub fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let queued_count = self.registry().list_queued()?.len();
        let mut active: Vec<ActiveDownload> = self
            .inner
            .lock_active()
            .iter()
            .map(|(id, a)| ActiveDownload {
                job_id: id.clone(),
                started_at: a.started_at,
                cancelling: a.cancel.is_cancelled(),
            })
            .collect();
        active.sort_by_key(|a| a.started_at);

        Ok(SchedulerStatus {
            running: self.is_running(),
            max_concurrent: self.inner.config.max_concurrent_downloads,
            active,
            queued_count,
        })
    }
}

impl SchedulerInner {
    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fill free slots with the oldest Queued jobs.
    fn admit_pending(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut active = self.lock_active();
        let max = self.config.max_concurrent_downloads.max(1);
        if active.len() >= max {
            return;
        }

        let queued = match self.runner.registry().list_queued() {
            Ok(queued) => queued,
            Err(e) => {
                error!("Failed to list queued jobs: {}", e);
                return;
            }
        };

        for job in queued {
            if active.len() >= max {
                break;
            }
            if active.contains_key(&job.id) {
                // Retried before its previous run released the slot. That run
                // admits again once it is gone; stopping here keeps FIFO order.
                debug!("Job {} still releasing its previous slot", job.id);
                break;
            }

            let patch = JobPatch::new()
                .with_status(JobStatus::Downloading)
                .with_progress(Some(0))
                .with_task(task::STARTING)
                .with_attempt_count(0)
                .with_candidate_index(0);

            match self.runner.registry().update(&job.id, job.version, patch) {
                Ok(job) => {
                    let cancel = self.runner.job_token();
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    let handle = tokio::spawn(Self::drive(
                        self.clone(),
                        job.id.clone(),
                        generation,
                        cancel.clone(),
                    ));
                    info!("Admitted job {} ({}/{} slots)", job.id, active.len() + 1, max);
                    active.insert(
                        job.id,
                        ActiveJob {
                            generation,
                            cancel,
                            handle: Some(handle),
                            started_at: Utc::now(),
                        },
                    );
                }
                Err(e) if e.is_conflict() || matches!(e, JobError::NotFound(_)) => {
                    // Lost a race with a cancel, retry or delete.
                    debug!("Skipping job {} during admission: {}", job.id, e);
                }
                Err(e) => {
                    error!("Failed to admit job {}: {}", job.id, e);
                    break;
                }
            }
        }
    }

    /// Run one job, then release its slot and admit the next.
    async fn drive(inner: Arc<Self>, job_id: String, generation: u64, cancel: CancellationToken) {
        match inner.runner.run(&job_id, cancel).await {
            Ok(job) => debug!("Job {} finished as {}", job_id, job.status),
            Err(e) => error!("Job {} runner error: {}", job_id, e),
        }

        {
            let mut active = inner.lock_active();
            if active.get(&job_id).is_some_and(|a| a.generation == generation) {
                active.remove(&job_id);
            }
        }
        inner.admit_pending();
    }
}
