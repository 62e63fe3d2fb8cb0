//! Job runner implementation.
//!
//! Drives one admitted job from Downloading to a terminal status:
//! - spawns the fallback resolver on its own task
//! - persists resolver events (task text, candidate index, progress) to the registry
//! - on cancellation, waits for the adapters up to the grace period, then aborts

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{ConflictReason, Job, JobError, JobPatch, JobRegistry, JobStatus, RESTART_ERROR};
use crate::metrics::FORCED_CANCELLATIONS;
use crate::resolver::{FallbackResolver, ResolveError, ResolveRequest, Resolved, ResolverEvent};

use super::config::OrchestratorConfig;
use super::types::{task, OrchestratorError};

/// Buffer between the resolver task and the runner.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type ResolveResult = Result<Result<Resolved, ResolveError>, JoinError>;

/// How the resolver task ended.
enum Outcome {
    /// The task returned (or panicked) on its own.
    Finished(ResolveResult),
    /// The grace period ran out after cancellation and the task was aborted.
    Forced,
}

/// Drives a single job through the state machine.
///
/// Per-job cancellation tokens are children of the runner's shutdown token, so
/// [`JobRunner::shutdown`] stops every job at once. Jobs stopped that way end
/// Failed (retryable) rather than Cancelled.
#[derive(Clone)]
pub struct JobRunner {
    registry: JobRegistry,
    resolver: Arc<FallbackResolver>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(
        registry: JobRegistry,
        resolver: Arc<FallbackResolver>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// A fresh cancellation token for one job.
    pub fn job_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every job started with a token from [`JobRunner::job_token`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a job that was already moved to Downloading, until it reaches a terminal status.
    pub async fn run(&self, job_id: &str, cancel: CancellationToken) -> Result<Job, OrchestratorError> {
        let job = self.registry.get(job_id)?;
        if job.status != JobStatus::Downloading {
            return Err(OrchestratorError::InvalidState {
                expected: JobStatus::Downloading,
                actual: job.status,
            });
        }

        let request = ResolveRequest {
            job_id: job.id.clone(),
            source: job.source.clone(),
            candidates: job.candidates.clone(),
            destination: self.config.download_dir.join(job.output_stem()),
        };
        info!(
            "Running job {} ({} candidates) -> {}",
            job.id,
            request.candidates.len(),
            request.destination.display()
        );

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let resolver = self.resolver.clone();
        let resolve_cancel = cancel.clone();
        let mut handle: JoinHandle<Result<Resolved, ResolveError>> =
            tokio::spawn(async move { resolver.resolve(&request, tx, resolve_cancel).await });

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => self.apply_event(job_id, event),
                result = &mut handle => break Outcome::Finished(result),
                _ = cancel.cancelled() => {
                    break self.wait_for_stop(job_id, &mut handle, &mut rx).await;
                }
            }
        };

        // Events sent just before the resolver returned.
        if !cancel.is_cancelled() {
            while let Ok(event) = rx.try_recv() {
                self.apply_event(job_id, event);
            }
        }

        self.commit(job_id, outcome, cancel.is_cancelled()).await
    }

    /// Wait for the resolver to acknowledge cancellation, up to the grace period.
    async fn wait_for_stop(
        &self,
        job_id: &str,
        handle: &mut JoinHandle<Result<Resolved, ResolveError>>,
        rx: &mut mpsc::Receiver<ResolverEvent>,
    ) -> Outcome {
        debug!("Job {} cancelling, waiting up to {}ms", job_id, self.config.cancel_grace_ms);
        let grace = tokio::time::sleep(self.config.cancel_grace());
        tokio::pin!(grace);

        loop {
            tokio::select! {
                result = &mut *handle => return Outcome::Finished(result),
                // Keep the channel drained so the resolver never blocks on it.
                Some(_) = rx.recv() => {}
                _ = &mut grace => {
                    handle.abort();
                    FORCED_CANCELLATIONS.inc();
                    warn!(
                        "Job {} did not stop within {}ms, forcing cancellation",
                        job_id, self.config.cancel_grace_ms
                    );
                    return Outcome::Forced;
                }
            }
        }
    }

    /// Persist one resolver event. Failures are logged and otherwise ignored.
    fn apply_event(&self, job_id: &str, event: ResolverEvent) {
        let result = self.registry.update_with(job_id, |job| {
            if job.status != JobStatus::Downloading {
                return Err(JobError::conflict(
                    job.id.clone(),
                    ConflictReason::Busy { status: job.status },
                ));
            }
            Ok(event_patch(&event))
        });

        if let Err(e) = result {
            debug!("Dropped resolver event for job {}: {}", job_id, e);
        }
    }

    async fn commit(&self, job_id: &str, outcome: Outcome, cancelled: bool) -> Result<Job, OrchestratorError> {
        let patch = match (outcome, cancelled) {
            (_, true) if self.shutdown.is_cancelled() => {
                info!("Job {} interrupted by shutdown", job_id);
                JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_task(task::FAILED)
                    .with_error(RESTART_ERROR)
            }
            (Outcome::Finished(Ok(Ok(resolved))), true) => {
                // The transfer finished after cancel was accepted; the file is not kept.
                remove_partial_output(&resolved).await;
                cancelled_patch()
            }
            (_, true) | (Outcome::Forced, false) => cancelled_patch(),
            (Outcome::Finished(Ok(Ok(resolved))), false) => {
                info!(
                    "Job {} completed via mirror {} -> {}",
                    job_id,
                    resolved.candidate_index + 1,
                    resolved.file_path.display()
                );
                JobPatch::new()
                    .with_status(JobStatus::Completed)
                    .with_progress(Some(100))
                    .with_task(task::COMPLETED)
                    .with_candidate_index(resolved.candidate_index)
                    .with_file_path(resolved.file_path)
            }
            (Outcome::Finished(Ok(Err(ResolveError::Cancelled))), false) => cancelled_patch(),
            (Outcome::Finished(Ok(Err(e))), false) => {
                warn!("Job {} failed: {}", job_id, e);
                JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_task(task::FAILED)
                    .with_error(e.to_string())
            }
            (Outcome::Finished(Err(join_err)), false) => {
                error!("Resolver task for job {} crashed: {}", job_id, join_err);
                JobPatch::new()
                    .with_status(JobStatus::Failed)
                    .with_task(task::FAILED)
                    .with_error(format!("internal error: {}", join_err))
            }
        };

        let committed = self.registry.update_with(job_id, |job| {
            if job.status != JobStatus::Downloading {
                return Err(JobError::conflict(
                    job.id.clone(),
                    ConflictReason::IllegalTransition {
                        from: job.status,
                        to: patch.status.unwrap_or(job.status),
                    },
                ));
            }
            Ok(patch.clone())
        });

        match committed {
            Ok(job) => Ok(job),
            Err(e) if e.is_conflict() => {
                // Someone else already finished the job.
                warn!("Job {} left Downloading before the runner finished: {}", job_id, e);
                Ok(self.registry.get(job_id)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn cancelled_patch() -> JobPatch {
    JobPatch::new()
        .with_status(JobStatus::Cancelled)
        .with_task(task::CANCELLED)
}

fn event_patch(event: &ResolverEvent) -> JobPatch {
    match event {
        ResolverEvent::CandidateStarted { index, total, .. } => {
            let patch = JobPatch::new()
                .with_candidate_index(*index)
                .with_attempt_count(*index as u32 + 1);
            // Later candidates keep the "failed, retrying" text of the previous one.
            if *index == 0 {
                patch.with_task(task::trying(*index, *total))
            } else {
                patch
            }
        }
        ResolverEvent::CandidateSoftFailure { record, total } => {
            JobPatch::new().with_task(task::mirror_failed(record.candidate_index, *total))
        }
        ResolverEvent::TransferStarted { index, total } => {
            JobPatch::new().with_task(task::downloading(*index, *total))
        }
        ResolverEvent::TransferRetry {
            index,
            total,
            attempt,
            max_attempts,
            ..
        } => JobPatch::new().with_task(task::transfer_retry(*attempt, *max_attempts, *index, *total)),
        ResolverEvent::Progress(progress) => JobPatch::new().with_progress(progress.percent()),
    }
}

async fn remove_partial_output(resolved: &Resolved) {
    if let Err(e) = tokio::fs::remove_file(&resolved.file_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "Failed to remove output of cancelled job {}: {}",
                resolved.file_path.display(),
                e
            );
        }
    }
}
