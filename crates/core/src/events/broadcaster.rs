//! Fan-out of job events to observers using a tokio broadcast channel.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::JobEvent;
use crate::job::Job;
use crate::metrics::EVENTS_DROPPED;

/// Default per-observer buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Process-wide broadcaster for job events.
///
/// Every subscriber has its own bounded view of the channel: when a subscriber
/// falls more than `capacity` events behind, its oldest unread events are
/// dropped. Publishing never waits on subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: JobEvent) {
        // Send errors just mean no one is listening
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.sender.subscribe(),
            dropped: 0,
        }
    }

    /// Publish a `created` event for a job.
    pub fn job_created(&self, job: &Job) {
        self.publish(JobEvent::created(job));
    }

    /// Publish an `updated` event for a job.
    pub fn job_updated(&self, job: &Job) {
        self.publish(JobEvent::updated(job));
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// One observer's view of the event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<JobEvent>,
    dropped: u64,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the broadcaster is gone. Overflow is skipped over
    /// and accounted in [`Subscription::dropped`].
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event channel closed");
                    return None;
                }
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Events this subscription lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, n: u64) {
        warn!(skipped = n, "Event subscriber lagged, dropping oldest events");
        self.dropped += n;
        EVENTS_DROPPED.inc_by(n);
    }
}
