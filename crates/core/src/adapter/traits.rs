//! Trait definitions for the external capture and transfer collaborators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::{CaptureError, TransferError};
use super::types::{ProgressSink, StreamDescriptor};
use crate::job::Candidate;

/// Obtains an authenticated stream descriptor for one candidate.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    /// Returns the name of this adapter implementation.
    fn name(&self) -> &str;

    /// Capture a stream descriptor for `candidate` of the job submitted with `source`.
    ///
    /// The resolver enforces `timeout` around the call as well; adapters may
    /// use it to bound their own requests. Implementations should return
    /// promptly once `cancel` fires.
    async fn capture(
        &self,
        source: &str,
        candidate: &Candidate,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StreamDescriptor, CaptureError>;
}

/// Moves the bytes behind a stream descriptor to disk.
#[async_trait]
pub trait TransferAdapter: Send + Sync {
    /// Returns the name of this adapter implementation.
    fn name(&self) -> &str;

    /// Transfer `descriptor` to `destination` and return the final file path.
    ///
    /// `destination` has no extension; the adapter picks one. Progress goes
    /// through `progress`, whose `report` fails once the job is cancelled.
    async fn transfer(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
        progress: &ProgressSink,
    ) -> Result<PathBuf, TransferError>;
}
