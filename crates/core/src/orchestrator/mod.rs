//! Per-job orchestration.
//!
//! A [`JobRunner`] drives one admitted job through the state machine using the
//! fallback resolver, persisting every step to the registry:
//! - **Resolution**: runs on its own task and reports through a per-job channel
//! - **Cancellation**: cooperative, bounded by `cancel_grace_ms`

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::JobRunner;
pub use types::OrchestratorError;

pub(crate) use types::task;
