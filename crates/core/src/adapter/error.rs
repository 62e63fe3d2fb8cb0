//! Error types for capture and transfer adapters.

use thiserror::Error;

/// Outcome of a failed capture attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// Transient failure (network error, empty result, timeout). The next
    /// candidate may still work.
    #[error("capture failed: {0}")]
    Soft(String),

    /// The content is confirmed unavailable. No other candidate is tried.
    #[error("content unavailable: {0}")]
    Hard(String),

    /// The job was cancelled while capturing.
    #[error("capture cancelled")]
    Cancelled,
}

/// Outcome of a failed transfer attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Partial write or transient I/O error; the transfer may be retried.
    #[error("transfer interrupted: {0}")]
    Soft(String),

    /// Unrecoverable transfer failure.
    #[error("transfer failed: {0}")]
    Hard(String),

    /// The job was cancelled while transferring.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Classify an I/O error raised while writing the destination.
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::Unsupported => {
                TransferError::Hard(e.to_string())
            }
            _ => TransferError::Soft(e.to_string()),
        }
    }
}
