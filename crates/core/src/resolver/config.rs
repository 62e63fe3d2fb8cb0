//! Fallback resolver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the mirror fallback resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound for one capture attempt (seconds).
    /// A capture that runs past it counts as a soft failure.
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,

    /// Transfer attempts per candidate before the candidate is given up.
    #[serde(default = "default_transfer_attempts")]
    pub transfer_attempts: u32,

    /// Pause between transfer attempts on the same candidate (milliseconds).
    #[serde(default = "default_transfer_retry_delay")]
    pub transfer_retry_delay_ms: u64,
}

fn default_capture_timeout() -> u64 {
    60
}

fn default_transfer_attempts() -> u32 {
    3
}

fn default_transfer_retry_delay() -> u64 {
    1000
}

impl ResolverConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn transfer_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transfer_retry_delay_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            capture_timeout_secs: default_capture_timeout(),
            transfer_attempts: default_transfer_attempts(),
            transfer_retry_delay_ms: default_transfer_retry_delay(),
        }
    }
}
