//! Redis-backed broker plumbing.
//!
//! The publisher pushes event envelopes onto a list; the consumer pops them with `BLMOVE` into a per-queue
//! processing list so that an unacknowledged delivery is never silently lost. `ack` removes the entry from the
//! processing list, `abandon` moves it back onto the queue for redelivery. Entries stranded in the processing list
//! by a crashed consumer are not re-driven from here; the database outbox relay is the authoritative retry path.
use std::time::Duration;

use async_trait::async_trait;
use log::*;
use ofp_engine::events::{EventEnvelope, EventPublisher, PublishError};
use redis::aio::MultiplexedConnection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Could not connect to the broker. {0}")]
    Connection(String),
    #[error("Broker command failed. {0}")]
    Command(#[from] redis::RedisError),
}

async fn connect(url: &str) -> Result<MultiplexedConnection, BrokerError> {
    let client = redis::Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;
    client.get_multiplexed_tokio_connection().await.map_err(|e| BrokerError::Connection(e.to_string()))
}

//-----------------------------------------------  Publisher  ----------------------------------------------------

/// Pushes event envelopes onto a redis list. Cheap to clone; the underlying connection is multiplexed.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: MultiplexedConnection,
    queue: String,
}

impl RedisPublisher {
    pub async fn connect(url: &str, queue: &str) -> Result<Self, BrokerError> {
        let conn = connect(url).await?;
        info!("📡️ Broker publisher connected, queue '{queue}'");
        Ok(Self { conn, queue: queue.to_string() })
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue)
            .arg(&payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| PublishError::Rejected(e.to_string()))?;
        trace!("📡️ Published {} for order {}", envelope.event_type, envelope.correlation_id);
        Ok(())
    }
}

//-----------------------------------------------  Consumer  -----------------------------------------------------

/// A message popped off the queue. `raw` is the exact list entry, kept so that `ack`/`abandon` can address it
/// with `LREM`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    raw: String,
}

pub struct RedisQueueConsumer {
    conn: MultiplexedConnection,
    queue: String,
    processing: String,
}

impl RedisQueueConsumer {
    pub async fn connect(url: &str, queue: &str) -> Result<Self, BrokerError> {
        let conn = connect(url).await?;
        info!("📡️ Broker consumer connected, queue '{queue}'");
        Ok(Self { conn, queue: queue.to_string(), processing: format!("{queue}:processing") })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Blocks for up to `timeout` waiting for the next message. Returns `None` on timeout, and silently drops
    /// (with a log entry) list entries that do not decode as an envelope.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await?;
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_str::<EventEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Delivery { envelope, raw })),
            Err(e) => {
                warn!("📡️ Discarding undecodable message on '{}': {e}", self.queue);
                self.remove_from_processing(&raw).await?;
                Ok(None)
            },
        }
    }

    /// Marks the delivery as handled by removing it from the processing list.
    pub async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.remove_from_processing(&delivery.raw).await
    }

    /// Returns the delivery to the queue for another attempt.
    pub async fn abandon(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.remove_from_processing(&delivery.raw).await?;
        redis::cmd("LPUSH").arg(&self.queue).arg(&delivery.raw).query_async::<_, ()>(&mut self.conn).await?;
        debug!("📡️ Returned message {} to '{}'", delivery.envelope.message_id, self.queue);
        Ok(())
    }

    async fn remove_from_processing(&mut self, raw: &str) -> Result<(), BrokerError> {
        redis::cmd("LREM").arg(&self.processing).arg(1).arg(raw).query_async::<_, ()>(&mut self.conn).await?;
        Ok(())
    }
}
