//! Status consumer worker.
//!
//! One task reads the worker's status stream and applies each message
//! strictly in receipt order. A message that fails to apply is logged and
//! breaks the loop; the [`Supervisor`] restarts it after a delay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use tackle_core::{Destination, Error, ExecutionState, MessageQueue, Result};

use crate::lifecycle::LifecycleManager;

/// Events emitted by a running consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// The consumer loop (re)started.
    Started,
    /// A status message was applied.
    MessageApplied {
        analysis_id: i64,
        run_id: i64,
        state: ExecutionState,
    },
    /// A message could not be applied and the loop broke.
    Aborted { error: String },
    /// The supervisor is about to restart the loop.
    Restarting { attempt: u32 },
    /// The consumer stopped for good.
    Stopped,
}

/// Why one pass of the consumer loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    Shutdown,
    /// The stream was closed by its transport.
    Closed,
    Aborted(String),
}

/// Handle for controlling a running consumer.
pub struct ConsumerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<ConsumerEvent>,
}

impl ConsumerHandle {
    /// Signal the consumer to stop after the message in hand.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for consumer events.
    pub fn events(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Applies status messages from one destination.
pub struct StatusConsumer {
    queue: Arc<dyn MessageQueue>,
    lifecycle: Arc<LifecycleManager>,
    destination: Destination,
    event_tx: broadcast::Sender<ConsumerEvent>,
}

impl StatusConsumer {
    pub fn new(queue: Arc<dyn MessageQueue>, lifecycle: Arc<LifecycleManager>) -> Self {
        let (event_tx, _) = broadcast::channel(tackle_core::defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            lifecycle,
            destination: Destination::StatusUpdateQueue,
            event_tx,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Run the loop until shutdown, stream close, or the first failure.
    ///
    /// Shutdown is only observed while waiting for a message, never while
    /// one is being applied.
    #[instrument(
        skip(self, shutdown_rx),
        fields(subsystem = "jobs", component = "consumer", destination = %self.destination)
    )]
    pub async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> ConsumerExit {
        info!("Status consumer started");
        let _ = self.event_tx.send(ConsumerEvent::Started);

        loop {
            let received = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Status consumer received shutdown signal");
                    return ConsumerExit::Shutdown;
                }
                received = self.queue.receive(self.destination) => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("Status stream closed");
                    return ConsumerExit::Closed;
                }
                Err(e) => return self.abort(e),
            };

            match self.lifecycle.handle_message(&message).await {
                Ok(applied) => {
                    let _ = self.event_tx.send(ConsumerEvent::MessageApplied {
                        analysis_id: applied.analysis_id,
                        run_id: applied.run_id,
                        state: applied.state,
                    });
                }
                Err(e) => return self.abort(e),
            }
        }
    }

    fn abort(&self, e: Error) -> ConsumerExit {
        error!(error = %e, "Status consumer aborted, message dropped");
        let error = e.to_string();
        let _ = self.event_tx.send(ConsumerEvent::Aborted {
            error: error.clone(),
        });
        ConsumerExit::Aborted(error)
    }
}

/// Keeps a [`StatusConsumer`] running across failures.
pub struct Supervisor {
    consumer: StatusConsumer,
    restart_delay: Duration,
    max_restarts: Option<u32>,
}

impl Supervisor {
    pub fn new(consumer: StatusConsumer) -> Self {
        Self {
            consumer,
            restart_delay: Duration::from_millis(tackle_core::defaults::CONSUMER_RESTART_DELAY_MS),
            max_restarts: None,
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Give up after this many restarts; `None` restarts forever.
    pub fn with_max_restarts(mut self, max: Option<u32>) -> Self {
        self.max_restarts = max;
        self
    }

    /// Start supervising and return a handle for control.
    pub fn start(self) -> ConsumerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.consumer.event_tx.subscribe();

        tokio::spawn(async move {
            self.supervise(&mut shutdown_rx).await;
        });

        ConsumerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn supervise(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        let events = &self.consumer.event_tx;
        let mut restarts = 0u32;

        loop {
            match self.consumer.run(shutdown_rx).await {
                ConsumerExit::Shutdown | ConsumerExit::Closed => break,
                ConsumerExit::Aborted(_) => {}
            }

            if self.max_restarts.is_some_and(|max| restarts >= max) {
                error!(restarts, "Status consumer restart budget exhausted");
                break;
            }
            restarts += 1;
            warn!(
                attempt = restarts,
                delay_ms = self.restart_delay.as_millis() as u64,
                "Restarting status consumer"
            );
            let _ = events.send(ConsumerEvent::Restarting { attempt: restarts });

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Status consumer received shutdown signal");
                    break;
                }
                _ = sleep(self.restart_delay) => {}
            }
        }

        let _ = events.send(ConsumerEvent::Stopped);
        info!("Status consumer stopped");
    }
}
