//! Real-time job event distribution.

mod broadcaster;
mod types;

pub use broadcaster::{EventBroadcaster, Subscription, DEFAULT_BUFFER_SIZE};
pub use types::{JobEvent, JobSnapshot};
