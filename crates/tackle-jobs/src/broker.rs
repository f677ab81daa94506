//! In-process message broker.
//!
//! One unbounded channel per [`Destination`]. Used when no database is
//! configured and by tests that play the part of the analysis worker.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace};

use tackle_core::{Destination, Error, MessageQueue, QueueMessage, Result};

struct Channel {
    tx: mpsc::UnboundedSender<QueueMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

/// [`MessageQueue`] backed by tokio channels.
///
/// Each destination behaves as a queue: a message is delivered to exactly
/// one receiver.
pub struct ChannelBroker {
    channels: HashMap<Destination, Channel>,
    closed_tx: watch::Sender<bool>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        let channels = Destination::ALL
            .into_iter()
            .map(|d| (d, Channel::new()))
            .collect();
        let (closed_tx, _) = watch::channel(false);
        Self {
            channels,
            closed_tx,
        }
    }

    fn channel(&self, destination: Destination) -> Result<&Channel> {
        self.channels
            .get(&destination)
            .ok_or_else(|| Error::Queue(format!("Unknown destination {}", destination)))
    }

    /// Close every destination; blocked receivers return `None`.
    pub fn close(&self) {
        debug!("Closing in-process broker");
        let _ = self.closed_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Take the next message without waiting.
    pub async fn try_receive(&self, destination: Destination) -> Option<QueueMessage> {
        let channel = self.channel(destination).ok()?;
        let mut rx = channel.rx.lock().await;
        rx.try_recv().ok()
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for ChannelBroker {
    async fn send(&self, destination: Destination, message: QueueMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Queue(format!("{} is closed", destination)));
        }
        trace!(
            destination = %destination,
            analysis_id = message.attributes.analysis_id,
            run_id = message.attributes.run_id,
            "Message sent"
        );
        self.channel(destination)?
            .tx
            .send(message)
            .map_err(|_| Error::Queue(format!("{} has no receiver", destination)))
    }

    async fn receive(&self, destination: Destination) -> Result<Option<QueueMessage>> {
        let channel = self.channel(destination)?;
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut rx = channel.rx.lock().await;
        tokio::select! {
            biased;
            message = rx.recv() => Ok(message),
            _ = closed.changed() => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_receive_in_order() {
        let broker = ChannelBroker::new();
        let dest = Destination::StatusUpdateQueue;
        broker.send(dest, QueueMessage::new("1", 7, 70)).await.unwrap();
        broker.send(dest, QueueMessage::new("2", 7, 70)).await.unwrap();

        let first = broker.receive(dest).await.unwrap().unwrap();
        let second = broker.receive(dest).await.unwrap().unwrap();
        assert_eq!(first.body, "1");
        assert_eq!(second.body, "2");
        assert_eq!(first.attributes.run_id, 70);
    }

    #[tokio::test]
    async fn test_destinations_are_independent() {
        let broker = ChannelBroker::new();
        broker
            .send(Destination::ExecutorQueue, QueueMessage::new("run", 1, 2))
            .await
            .unwrap();
        assert!(broker
            .try_receive(Destination::StatusUpdateQueue)
            .await
            .is_none());
        assert_eq!(
            broker
                .try_receive(Destination::ExecutorQueue)
                .await
                .unwrap()
                .body,
            "run"
        );
    }

    #[tokio::test]
    async fn test_close_unblocks_receiver() {
        let broker = Arc::new(ChannelBroker::new());
        let waiting = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.receive(Destination::StatusUpdateQueue).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();

        let received = waiting.await.unwrap().unwrap();
        assert!(received.is_none());
        assert!(broker
            .send(Destination::StatusUpdateQueue, QueueMessage::new("x", 1, 1))
            .await
            .is_err());
    }
}
