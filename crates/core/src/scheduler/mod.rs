//! Bounded concurrent execution of jobs.

mod config;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use runner::DownloadScheduler;
pub use types::{ActiveDownload, SchedulerError, SchedulerStatus};
