//! Mirror/variant fallback strategy.

mod config;
mod fallback;
mod types;

pub use config::ResolverConfig;
pub use fallback::FallbackResolver;
pub use types::{
    AttemptRecord, AttemptStage, ResolveError, ResolveRequest, Resolved, ResolverEvent,
};
