pub mod adapter;
pub mod config;
pub mod events;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod testing;

pub use adapter::{
    CaptureAdapter, CaptureError, HttpCapture, HttpTransfer, Progress, ProgressSink,
    StreamDescriptor, TransferAdapter, TransferError,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{EventBroadcaster, JobEvent, JobSnapshot, Subscription};
pub use job::{
    Candidate, ConflictReason, ContentType, CreateJobRequest, EpisodeNumber, Job, JobError,
    JobPatch, JobRegistry, JobStatus, JobStore, SqliteJobStore,
};
pub use orchestrator::{JobRunner, OrchestratorConfig, OrchestratorError};
pub use resolver::{FallbackResolver, ResolveError, ResolverConfig};
pub use scheduler::{DownloadScheduler, SchedulerConfig, SchedulerError, SchedulerStatus};
