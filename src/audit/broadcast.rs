//! Live Append Broadcaster
//!
//! Fans newly committed records out to live viewers. Each subscriber reads
//! through its own bounded window; a subscriber that falls behind loses the
//! oldest events and never slows the writer. Viewers reconcile through
//! `query`, so a missed event is not a correctness problem.

use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::entry::AuditRecord;

/// Default number of undelivered events kept per subscriber
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<Arc<AuditRecord>>,
}

impl Broadcaster {
    /// `buffer` is the per-subscriber backlog before the oldest events drop
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Publish a committed record; returns how many subscribers it was queued for.
    ///
    /// Never blocks and never fails: with no subscribers the event is discarded.
    pub fn publish(&self, record: Arc<AuditRecord>) -> usize {
        match self.sender.send(record) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            receiver: self.sender.subscribe(),
            dropped: 0,
        };
        debug!(
            "Audit subscriber {} joined ({} active)",
            subscription.id,
            self.subscriber_count()
        );
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// One viewer's live feed. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    receiver: broadcast::Receiver<Arc<AuditRecord>>,
    dropped: u64,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Events lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next event, or `None` once the ledger is gone
    pub async fn recv(&mut self) -> Option<Arc<AuditRecord>> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => return Some(record),
                Err(RecvError::Lagged(skipped)) => self.overflowed(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event without waiting
    pub fn try_recv(&mut self) -> Option<Arc<AuditRecord>> {
        loop {
            match self.receiver.try_recv() {
                Ok(record) => return Some(record),
                Err(TryRecvError::Lagged(skipped)) => self.overflowed(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Consume the subscription as a stream of events
    pub fn into_stream(self) -> impl Stream<Item = Arc<AuditRecord>> + Send {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|record| (record, subscription))
        })
    }

    fn overflowed(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            subscriber = %self.id,
            skipped,
            "Audit subscriber fell behind; oldest events dropped"
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Audit subscriber {} left", self.id);
    }
}
