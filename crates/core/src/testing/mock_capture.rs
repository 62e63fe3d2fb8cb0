//! Mock capture adapter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::adapter::{CaptureAdapter, CaptureError, StreamDescriptor};
use crate::job::Candidate;

/// Scripted capture behavior for one endpoint.
#[derive(Debug, Clone)]
pub enum CaptureScript {
    /// Return a descriptor whose URL is the endpoint itself.
    Succeed,
    /// Return a soft failure with the given reason.
    SoftFail(String),
    /// Return a hard failure with the given reason.
    HardFail(String),
    /// Never return until cancelled.
    Hang,
}

/// Mock implementation of the CaptureAdapter trait.
///
/// Unscripted endpoints succeed. Every call is recorded by endpoint.
///
/// # Example
///
/// ```rust,ignore
/// let capture = MockCapture::new();
/// capture.set_script("mirror-1", CaptureScript::SoftFail("HTTP 503".into())).await;
///
/// // ... run a job with candidates ["mirror-1", "mirror-2"] ...
///
/// assert_eq!(capture.calls().await, vec!["mirror-1", "mirror-2"]);
/// ```
#[derive(Debug, Default)]
pub struct MockCapture {
    scripts: Arc<RwLock<HashMap<String, CaptureScript>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockCapture {
    /// Create a new mock where every endpoint succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the behavior for an endpoint.
    pub async fn set_script(&self, endpoint: impl Into<String>, script: CaptureScript) {
        self.scripts.write().await.insert(endpoint.into(), script);
    }

    /// Endpoints captured so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of capture calls so far.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl CaptureAdapter for MockCapture {
    fn name(&self) -> &str {
        "mock"
    }

    async fn capture(
        &self,
        _source: &str,
        candidate: &Candidate,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StreamDescriptor, CaptureError> {
        self.calls.write().await.push(candidate.endpoint.clone());

        let script = self
            .scripts
            .read()
            .await
            .get(&candidate.endpoint)
            .cloned()
            .unwrap_or(CaptureScript::Succeed);

        match script {
            CaptureScript::Succeed => Ok(StreamDescriptor::new(candidate.endpoint.clone())),
            CaptureScript::SoftFail(reason) => Err(CaptureError::Soft(reason)),
            CaptureScript::HardFail(reason) => Err(CaptureError::Hard(reason)),
            CaptureScript::Hang => {
                cancel.cancelled().await;
                Err(CaptureError::Cancelled)
            }
        }
    }
}
