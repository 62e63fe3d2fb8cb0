//! Types exchanged with capture and transfer adapters.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use crate::resolver::ResolverEvent;

/// Authenticated reference to a playable stream, produced by capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream URL.
    pub url: String,
    /// Headers the transfer must send (referer, cookies, ...).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl StreamDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A transfer progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    /// Percentage 0-100.
    Percent(u8),
    /// Total size unknown.
    Indeterminate,
}

impl Progress {
    /// Percentage for the given byte counts, `Indeterminate` when the total is unknown.
    pub fn from_bytes(done: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) if total > 0 => {
                let percent = u128::from(done.min(total)) * 100 / u128::from(total);
                Progress::Percent(percent as u8)
            }
            _ => Progress::Indeterminate,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Percent(p) => Some(*p),
            Progress::Indeterminate => None,
        }
    }
}

/// Progress callback handed to transfer adapters.
///
/// Reports are forwarded to the job's resolver channel. Percentages never go
/// backwards, and an indeterminate report is only forwarded while no
/// percentage is known. Once the job is cancelled every report fails with
/// [`TransferError::Cancelled`], which is the adapter's cue to stop.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<ResolverEvent>,
    cancel: CancellationToken,
    last: Mutex<Option<Progress>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ResolverEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            last: Mutex::new(None),
        }
    }

    /// Report progress. Returns `Err(Cancelled)` once cancellation was requested.
    pub fn report(&self, progress: Progress) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let forward = {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let forward = match (*last, progress) {
                (None, _) => true,
                (Some(Progress::Percent(old)), Progress::Percent(new)) => new > old,
                (Some(Progress::Indeterminate), Progress::Percent(_)) => true,
                (Some(_), Progress::Indeterminate) => false,
            };
            if forward {
                *last = Some(progress);
            }
            forward
        };

        if forward {
            // Progress is lossy: a full channel only drops this report.
            let _ = self.tx.try_send(ResolverEvent::Progress(progress));
        }
        Ok(())
    }

    /// Token that is cancelled when the job is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ResolverEvent>) -> Vec<Progress> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ResolverEvent::Progress(p) = event {
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(Progress::from_bytes(50, Some(200)), Progress::Percent(25));
        assert_eq!(Progress::from_bytes(300, Some(200)), Progress::Percent(100));
        assert_eq!(Progress::from_bytes(10, None), Progress::Indeterminate);
        assert_eq!(Progress::from_bytes(10, Some(0)), Progress::Indeterminate);
    }

    #[test]
    fn test_from_bytes_huge_totals() {
        assert_eq!(Progress::from_bytes(u64::MAX / 2, Some(u64::MAX)), Progress::Percent(49));
        assert_eq!(Progress::from_bytes(u64::MAX, Some(u64::MAX)), Progress::Percent(100));
    }

    #[test]
    fn test_sink_is_monotone() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ProgressSink::new(tx, CancellationToken::new());

        sink.report(Progress::Indeterminate).unwrap();
        sink.report(Progress::Indeterminate).unwrap();
        sink.report(Progress::Percent(30)).unwrap();
        sink.report(Progress::Percent(20)).unwrap();
        sink.report(Progress::Indeterminate).unwrap();
        sink.report(Progress::Percent(30)).unwrap();
        sink.report(Progress::Percent(80)).unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                Progress::Indeterminate,
                Progress::Percent(30),
                Progress::Percent(80)
            ]
        );
    }

    #[test]
    fn test_sink_reports_cancellation() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let sink = ProgressSink::new(tx, cancel.clone());

        sink.report(Progress::Percent(10)).unwrap();
        cancel.cancel();
        assert_eq!(
            sink.report(Progress::Percent(20)),
            Err(TransferError::Cancelled)
        );
        assert_eq!(drain(&mut rx), vec![Progress::Percent(10)]);
    }
}
