//! Plain HTTP reference adapters.
//!
//! `HttpCapture` resolves a candidate endpoint against the job's source and
//! probes it; `HttpTransfer` streams the descriptor URL to disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{CaptureError, TransferError};
use super::traits::{CaptureAdapter, TransferAdapter};
use super::types::{Progress, ProgressSink, StreamDescriptor};
use crate::job::Candidate;

const USER_AGENT: &str = concat!("streamgrab/", env!("CARGO_PKG_VERSION"));
const DEFAULT_EXTENSION: &str = "mp4";

/// Statuses that mean the content is gone rather than temporarily unreachable.
fn is_unavailable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS
    )
}

fn build_client(connect_timeout: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Resolve a candidate endpoint: absolute URLs are used as-is, anything else
/// is joined to the source reference.
pub fn resolve_endpoint(source: &str, endpoint: &str) -> Result<Url, String> {
    if let Ok(url) = Url::parse(endpoint) {
        return Ok(url);
    }
    let base = Url::parse(source).map_err(|e| format!("invalid source URL {}: {}", source, e))?;
    base.join(endpoint)
        .map_err(|e| format!("invalid endpoint {}: {}", endpoint, e))
}

// ============================================================================
// Capture
// ============================================================================

/// Capture adapter that probes the candidate URL with a GET request.
pub struct HttpCapture {
    client: Client,
}

impl HttpCapture {
    pub fn new() -> Self {
        Self {
            client: build_client(Duration::from_secs(10)),
        }
    }
}

impl Default for HttpCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureAdapter for HttpCapture {
    fn name(&self) -> &str {
        "http"
    }

    async fn capture(
        &self,
        source: &str,
        candidate: &Candidate,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StreamDescriptor, CaptureError> {
        let url = resolve_endpoint(source, &candidate.endpoint).map_err(CaptureError::Hard)?;
        debug!(url = %url, "Probing candidate");

        let request = self.client.get(url.clone()).timeout(timeout).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            result = request => result.map_err(|e| {
                if e.is_timeout() {
                    CaptureError::Soft(format!("timed out probing {}", url))
                } else {
                    CaptureError::Soft(e.to_string())
                }
            })?,
        };

        let status = response.status();
        if is_unavailable(status) {
            return Err(CaptureError::Hard(format!("HTTP {} from {}", status, url)));
        }
        if !status.is_success() {
            return Err(CaptureError::Soft(format!("HTTP {} from {}", status, url)));
        }

        // Redirects are followed; the final URL is the stream.
        Ok(StreamDescriptor::new(response.url().as_str()).with_header("Referer", source))
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Transfer adapter that streams the descriptor URL into a file.
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
        }
    }
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new()
    }
}

/// File extension taken from the last URL path segment, if it looks like one.
fn extension_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|segment| {
            segment
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
        })
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// A `.part` file that is removed on drop unless it was moved into place.
///
/// Covers every way a transfer can stop early, including the task being
/// aborted mid-write.
struct PartFile {
    path: PathBuf,
    persisted: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the finished part file to `final_path`.
    async fn persist(mut self, final_path: &Path) -> Result<(), TransferError> {
        tokio::fs::rename(&self.path, final_path)
            .await
            .map_err(|e| TransferError::from_io(&e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

impl HttpTransfer {
    async fn stream_to(
        &self,
        response: reqwest::Response,
        part_path: &Path,
        progress: &ProgressSink,
    ) -> Result<(), TransferError> {
        let total = response.content_length();
        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| TransferError::from_io(&e))?;

        progress.report(Progress::from_bytes(0, total))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransferError::Soft(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::from_io(&e))?;
            written += chunk.len() as u64;
            progress.report(Progress::from_bytes(written, total))?;
        }
        file.flush().await.map_err(|e| TransferError::from_io(&e))?;

        if let Some(total) = total {
            if written < total {
                return Err(TransferError::Soft(format!(
                    "short write: {} of {} bytes",
                    written, total
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransferAdapter for HttpTransfer {
    fn name(&self) -> &str {
        "http"
    }

    async fn transfer(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
        progress: &ProgressSink,
    ) -> Result<PathBuf, TransferError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::Hard(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let final_path = with_suffix(destination, &format!(".{}", extension_from_url(&descriptor.url)));

        let mut request = self.client.get(&descriptor.url);
        for (name, value) in &descriptor.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            _ = progress.cancellation().cancelled() => return Err(TransferError::Cancelled),
            result = request.send() => result.map_err(|e| TransferError::Soft(e.to_string()))?,
        };

        let status = response.status();
        if is_unavailable(status) || status == StatusCode::FORBIDDEN {
            return Err(TransferError::Hard(format!("HTTP {} from stream", status)));
        }
        if !status.is_success() {
            return Err(TransferError::Soft(format!("HTTP {} from stream", status)));
        }

        let part = PartFile::new(with_suffix(&final_path, ".part"));
        self.stream_to(response, part.path(), progress).await?;
        part.persist(&final_path).await?;
        debug!(path = %final_path.display(), "Transfer finished");
        Ok(final_path)
    }
}
