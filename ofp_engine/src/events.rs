//! Event types and the publisher seam.
//!
//! Creating an order emits exactly one `OrderCreated` event. The durable copy lives in the outbox table; the
//! [`EventPublisher`] implementation (if any) pushes an equivalent [`EventEnvelope`] to a broker on a best-effort
//! basis. Consumers must treat delivery as at-least-once.
use async_trait::async_trait;
use ofp_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{Order, OrderId, OutboxMessage};

/// The only event type currently produced by the pipeline.
pub const ORDER_CREATED: &str = "OrderCreated";

/// Snapshot of an order's identifying fields, taken at creation time. This is what gets serialized into the outbox
/// payload and the broker message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub id: OrderId,
    pub client: String,
    pub product: String,
    pub value: Money,
}

impl From<&Order> for OrderCreatedEvent {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            client: order.client.clone(),
            product: order.product.clone(),
            value: order.value,
        }
    }
}

/// The broker wire format.
///
/// `message_id` is the outbox record id, `correlation_id` is the order id, and `body` is the exact payload string
/// stored in the outbox record. The listener routes on `event_type` and ignores everything it does not recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub message_id: String,
    pub correlation_id: String,
    pub event_type: String,
    pub body: String,
}

impl EventEnvelope {
    pub fn for_outbox(msg: &OutboxMessage) -> Self {
        Self {
            message_id: msg.id.to_string(),
            correlation_id: msg.correlation_id.clone(),
            event_type: msg.event_type.clone(),
            body: msg.payload.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker connection failed: {0}")]
    Connection(String),
    #[error("Could not serialize event envelope: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Broker rejected the publish: {0}")]
    Rejected(String),
}

/// Seam for pushing events to a message broker.
///
/// Implementations are injected into [`crate::OrderFlowApi`]; nothing in the engine holds a broker handle as an
/// ambient global. A publish failure is never allowed to affect the order write that preceded it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError>;
}
