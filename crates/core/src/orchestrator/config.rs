//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the per-job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long a cancelled job waits for its adapters to stop (milliseconds).
    /// After this the job is committed as Cancelled regardless.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Directory output files are written to.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_cancel_grace() -> u64 {
    5000 // 5 seconds
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

impl OrchestratorConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: default_cancel_grace(),
            download_dir: default_download_dir(),
        }
    }
}
