//! Mirror fallback resolution.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ResolverConfig;
use super::types::{AttemptRecord, AttemptStage, ResolveError, ResolveRequest, Resolved, ResolverEvent};
use crate::adapter::{
    CaptureAdapter, CaptureError, ProgressSink, StreamDescriptor, TransferAdapter, TransferError,
};
use crate::job::Candidate;
use crate::metrics::{CANDIDATE_FAILURES, TRANSFER_RETRIES};

/// Walks a job's candidates in order until one yields a file.
///
/// - capture soft failure (including timeout): record it, move to the next candidate
/// - capture hard failure: stop, the content is gone
/// - transfer soft failure: retry the same candidate up to `transfer_attempts`,
///   then treat it as a candidate soft failure
/// - transfer hard failure: stop
///
/// The resolver never touches the registry. Everything it wants persisted is
/// sent as a [`ResolverEvent`] on the per-job channel.
pub struct FallbackResolver {
    capture: Arc<dyn CaptureAdapter>,
    transfer: Arc<dyn TransferAdapter>,
    config: ResolverConfig,
}

impl FallbackResolver {
    pub fn new(
        capture: Arc<dyn CaptureAdapter>,
        transfer: Arc<dyn TransferAdapter>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            capture,
            transfer,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one job attempt.
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        events: mpsc::Sender<ResolverEvent>,
        cancel: CancellationToken,
    ) -> Result<Resolved, ResolveError> {
        let total = request.candidates.len();
        let sink = ProgressSink::new(events.clone(), cancel.clone());
        let mut failures: Vec<AttemptRecord> = Vec::new();

        for (index, candidate) in request.candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }

            debug!(job_id = %request.job_id, index, total, endpoint = %candidate.endpoint, "Trying candidate");
            emit(
                &events,
                ResolverEvent::CandidateStarted {
                    index,
                    total,
                    endpoint: candidate.endpoint.clone(),
                },
            )
            .await;

            let descriptor = match self.capture_one(request, candidate, &cancel).await {
                Ok(descriptor) => descriptor,
                Err(CaptureError::Soft(reason)) => {
                    self.soft_failure(request, &events, &mut failures, index, total, AttemptStage::Capture, reason)
                        .await;
                    continue;
                }
                Err(CaptureError::Hard(reason)) => {
                    CANDIDATE_FAILURES
                        .with_label_values(&[AttemptStage::Capture.as_str(), "hard"])
                        .inc();
                    warn!(job_id = %request.job_id, index, reason = %reason, "Capture hard failure");
                    return Err(ResolveError::CaptureHardFailure { index, reason });
                }
                Err(CaptureError::Cancelled) => return Err(ResolveError::Cancelled),
            };

            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            emit(&events, ResolverEvent::TransferStarted { index, total }).await;

            match self
                .transfer_with_retries(request, &descriptor, &sink, &events, &cancel, index, total)
                .await
            {
                Ok(file_path) => {
                    info!(
                        job_id = %request.job_id,
                        index,
                        path = %file_path.display(),
                        soft_failures = failures.len(),
                        "Candidate delivered"
                    );
                    return Ok(Resolved {
                        candidate_index: index,
                        file_path,
                        soft_failures: failures,
                    });
                }
                Err(TransferError::Soft(reason)) => {
                    self.soft_failure(request, &events, &mut failures, index, total, AttemptStage::Transfer, reason)
                        .await;
                }
                Err(TransferError::Hard(reason)) => {
                    CANDIDATE_FAILURES
                        .with_label_values(&[AttemptStage::Transfer.as_str(), "hard"])
                        .inc();
                    warn!(job_id = %request.job_id, index, reason = %reason, "Transfer hard failure");
                    return Err(ResolveError::TransferHardFailure { index, reason });
                }
                Err(TransferError::Cancelled) => return Err(ResolveError::Cancelled),
            }
        }

        warn!(job_id = %request.job_id, attempted = total, "All mirrors exhausted");
        Err(ResolveError::AllMirrorsExhausted {
            attempted: total,
            failures,
        })
    }

    async fn capture_one(
        &self,
        request: &ResolveRequest,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<StreamDescriptor, CaptureError> {
        let timeout = self.config.capture_timeout();
        let capture = self
            .capture
            .capture(&request.source, candidate, timeout, cancel);

        tokio::select! {
            _ = cancel.cancelled() => Err(CaptureError::Cancelled),
            result = tokio::time::timeout(timeout, capture) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(CaptureError::Soft(format!(
                    "capture timed out after {}s",
                    self.config.capture_timeout_secs
                ))),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_with_retries(
        &self,
        request: &ResolveRequest,
        descriptor: &StreamDescriptor,
        sink: &ProgressSink,
        events: &mpsc::Sender<ResolverEvent>,
        cancel: &CancellationToken,
        index: usize,
        total: usize,
    ) -> Result<PathBuf, TransferError> {
        let max_attempts = self.config.transfer_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            match self
                .transfer
                .transfer(descriptor, &request.destination, sink)
                .await
            {
                Ok(path) => return Ok(path),
                Err(TransferError::Soft(reason)) if attempt < max_attempts => {
                    attempt += 1;
                    TRANSFER_RETRIES.inc();
                    debug!(job_id = %request.job_id, index, attempt, reason = %reason, "Retrying transfer");
                    emit(
                        events,
                        ResolverEvent::TransferRetry {
                            index,
                            total,
                            attempt,
                            max_attempts,
                            reason,
                        },
                    )
                    .await;

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(self.config.transfer_retry_delay()) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn soft_failure(
        &self,
        request: &ResolveRequest,
        events: &mpsc::Sender<ResolverEvent>,
        failures: &mut Vec<AttemptRecord>,
        index: usize,
        total: usize,
        stage: AttemptStage,
        reason: String,
    ) {
        CANDIDATE_FAILURES
            .with_label_values(&[stage.as_str(), "soft"])
            .inc();
        info!(job_id = %request.job_id, index, %stage, reason = %reason, "Candidate failed, moving on");

        let record = AttemptRecord {
            candidate_index: index,
            endpoint: request.candidates[index].endpoint.clone(),
            stage,
            reason,
        };
        failures.push(record.clone());
        emit(events, ResolverEvent::CandidateSoftFailure { record, total }).await;
    }
}

async fn emit(events: &mpsc::Sender<ResolverEvent>, event: ResolverEvent) {
    // A closed channel means the orchestrator stopped listening.
    let _ = events.send(event).await;
}
