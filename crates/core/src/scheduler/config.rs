//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the download scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs downloading at once (at least 1).
    /// Jobs beyond the bound stay Queued until a slot frees.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
}

fn default_max_concurrent() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
        }
    }
}
