//! Mock transfer adapter for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::adapter::{Progress, ProgressSink, StreamDescriptor, TransferAdapter, TransferError};

/// Scripted behavior for one transfer call.
#[derive(Debug, Clone)]
pub enum TransferScript {
    /// Report 50% and 100%, then write `<destination>.mp4`.
    Succeed,
    /// Like `Succeed`, after sleeping for the given duration.
    SucceedAfter(Duration),
    /// Report 10%, then fail softly.
    SoftFail(String),
    /// Fail hard without writing anything.
    HardFail(String),
    /// Keep transferring until a progress report fails, then return `Cancelled`.
    Cooperative,
    /// Keep transferring forever, ignoring cancellation.
    IgnoreCancel,
}

/// Mock implementation of the TransferAdapter trait.
///
/// Scripts are queued per descriptor URL and consumed one per call; calls
/// with an empty queue succeed.
#[derive(Debug, Default)]
pub struct MockTransfer {
    scripts: Arc<RwLock<HashMap<String, VecDeque<TransferScript>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockTransfer {
    /// Create a new mock where every transfer succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a behavior for the next transfer of `url`.
    pub async fn push_script(&self, url: impl Into<String>, script: TransferScript) {
        self.scripts
            .write()
            .await
            .entry(url.into())
            .or_default()
            .push_back(script);
    }

    /// Descriptor URLs transferred so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of transfer calls so far.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    async fn next_script(&self, url: &str) -> TransferScript {
        self.scripts
            .write()
            .await
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(TransferScript::Succeed)
    }
}

async fn write_output(destination: &Path) -> Result<PathBuf, TransferError> {
    let mut name: OsString = destination.as_os_str().to_owned();
    name.push(".mp4");
    let path = PathBuf::from(name);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::from_io(&e))?;
    }
    tokio::fs::write(&path, b"mock media")
        .await
        .map_err(|e| TransferError::from_io(&e))?;
    Ok(path)
}

#[async_trait]
impl TransferAdapter for MockTransfer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transfer(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
        progress: &ProgressSink,
    ) -> Result<PathBuf, TransferError> {
        self.calls.write().await.push(descriptor.url.clone());

        match self.next_script(&descriptor.url).await {
            TransferScript::Succeed => {
                progress.report(Progress::Percent(50))?;
                progress.report(Progress::Percent(100))?;
                write_output(destination).await
            }
            TransferScript::SucceedAfter(delay) => {
                progress.report(Progress::Indeterminate)?;
                tokio::time::sleep(delay).await;
                progress.report(Progress::Percent(100))?;
                write_output(destination).await
            }
            TransferScript::SoftFail(reason) => {
                progress.report(Progress::Percent(10))?;
                Err(TransferError::Soft(reason))
            }
            TransferScript::HardFail(reason) => Err(TransferError::Hard(reason)),
            TransferScript::Cooperative => {
                let mut percent = 1u8;
                loop {
                    progress.report(Progress::Percent(percent))?;
                    percent = (percent + 1).min(99);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            TransferScript::IgnoreCancel => loop {
                let _ = progress.report(Progress::Indeterminate);
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
        }
    }
}
