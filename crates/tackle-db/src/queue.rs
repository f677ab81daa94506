//! PostgreSQL-backed message queue.
//!
//! Messages are rows in `message_queue`. A receive claims the oldest pending
//! row for its destination with `FOR UPDATE SKIP LOCKED`, so several
//! consumers can share a destination without double delivery. Delivery is
//! at-most-once: a claimed row is never handed out again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, instrument};

use tackle_core::defaults::QUEUE_POLL_INTERVAL_MS;
use tackle_core::{Destination, Error, MessageAttributes, MessageQueue, QueueMessage, Result};

/// PostgreSQL implementation of [`MessageQueue`].
pub struct PgMessageQueue {
    pool: Pool<Postgres>,
    poll_interval: Duration,
    /// Wakes local receivers as soon as a local sender enqueues.
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl PgMessageQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(QUEUE_POLL_INTERVAL_MS),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stop handing out messages; blocked receivers return `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn claim(&self, destination: Destination) -> Result<Option<QueueMessage>> {
        let row = sqlx::query(
            "UPDATE message_queue
             SET status = 'delivered', claimed_at = now()
             WHERE id = (
                 SELECT id FROM message_queue
                 WHERE status = 'pending' AND destination = $1
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING body, analysis_id, run_id",
        )
        .bind(destination.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| QueueMessage {
            body: row.get("body"),
            attributes: MessageAttributes {
                analysis_id: row.get("analysis_id"),
                run_id: row.get("run_id"),
            },
        }))
    }

    /// Number of undelivered messages on a destination.
    pub async fn pending(&self, destination: Destination) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM message_queue WHERE status = 'pending' AND destination = $1",
        )
        .bind(destination.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }
}

#[async_trait]
impl MessageQueue for PgMessageQueue {
    #[instrument(skip(self, message), fields(subsystem = "db", component = "queue", destination = %destination))]
    async fn send(&self, destination: Destination, message: QueueMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Queue(format!("{} is closed", destination)));
        }
        sqlx::query(
            "INSERT INTO message_queue (destination, body, analysis_id, run_id)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(destination.as_str())
        .bind(&message.body)
        .bind(message.attributes.analysis_id)
        .bind(message.attributes.run_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        debug!(
            analysis_id = message.attributes.analysis_id,
            run_id = message.attributes.run_id,
            "Message enqueued"
        );
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, destination: Destination) -> Result<Option<QueueMessage>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            // Register interest before polling so a send in between is not missed.
            let notified = self.notify.notified();
            if let Some(message) = self.claim(destination).await? {
                return Ok(Some(message));
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
