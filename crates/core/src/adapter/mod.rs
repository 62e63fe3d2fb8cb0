//! Capture and transfer adapters.
//!
//! Both are external collaborators of the resolver; the HTTP implementations
//! here are minimal references so the server is runnable.

mod error;
mod http;
mod traits;
mod types;

pub use error::{CaptureError, TransferError};
pub use http::{resolve_endpoint, HttpCapture, HttpTransfer};
pub use traits::{CaptureAdapter, TransferAdapter};
pub use types::{Progress, ProgressSink, StreamDescriptor};
