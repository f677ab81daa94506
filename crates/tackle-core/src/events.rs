//! Progress broadcaster for live lifecycle and merge notifications.
//!
//! A fan-out over a bounded broadcast channel. Publishing never waits on a
//! subscriber; a subscriber that falls behind by more than the channel
//! capacity is dropped. Subscribers only see events published after they
//! subscribed.

use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::ProgressEvent;

/// Fan-out sink for progress events, carried as JSON text.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<String>,
}

impl ProgressBroadcaster {
    /// Create a new broadcaster with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Relay a raw message verbatim. Dropped when nobody is listening.
    pub fn publish(&self, message: impl Into<String>) {
        let message = message.into();
        let subscriber_count = self.tx.receiver_count();
        debug!(subscriber_count, bytes = message.len(), "Progress publish");
        let _ = self.tx.send(message);
    }

    /// Serialize and publish a milestone event.
    pub fn publish_event(&self, event: &ProgressEvent) {
        match serde_json::to_string(event) {
            Ok(json) => self.publish(json),
            Err(e) => warn!(error = %e, analysis_id = event.id, "Failed to serialize progress event"),
        }
    }

    /// Attach a new subscriber. No backlog is replayed.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

/// One subscriber's view of the broadcaster.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    /// Next event, or `None` once the broadcaster is gone or this subscriber
    /// fell too far behind.
    pub async fn recv(&mut self) -> Option<String> {
        match self.rx.recv().await {
            Ok(message) => Some(message),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Progress subscriber lagged, dropping it");
                None
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "Progress subscriber lagged, dropping it");
                None
            }
            Err(_) => None,
        }
    }

    /// Every buffered event, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(message) = self.try_recv() {
            out.push(message);
        }
        out
    }

    /// Consume the subscription as a stream ending on close or lag.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|message| (message, sub))
        })
    }
}
