use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use ofp_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;
use uuid::Uuid;

//--------------------------------------        OrderId        -------------------------------------------------------
/// The globally unique order identifier, assigned at creation and immutable thereafter.
///
/// Stored and transmitted as a hyphenated UUID string. Parsing validates UUID syntax, which is what lets the
/// consumers reject outbox records or broker messages whose correlation id is garbage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(String);

#[derive(Debug, Clone, Error)]
#[error("Invalid order id: {0}")]
pub struct OrderIdError(String);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for OrderId {
    type Err = OrderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s.trim()).map_err(|e| OrderIdError(format!("{s}: {e}")))?;
        Ok(Self(id.to_string()))
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------       OutboxId        -------------------------------------------------------
/// Unique identifier of an outbox record. Doubles as the broker message id when the event is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OutboxId(String);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------     OrderStatus       -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order is newly created and no consumer has picked it up yet.
    Pending,
    /// A consumer has claimed the order and fulfilment work is in flight.
    Processing,
    /// The order has been driven to completion. Terminal.
    Finalized,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::Processing => write!(f, "Processing"),
            OrderStatus::Finalized => write!(f, "Finalized"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid order status: {0}")]
pub struct ConversionError(String);

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Processing" => Ok(Self::Processing),
            "Finalized" => Ok(Self::Finalized),
            s => Err(ConversionError(s.to_string())),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Pending");
            OrderStatus::Pending
        })
    }
}

//--------------------------------------        Order       ----------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub client: String,
    pub product: String,
    pub value: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the order was last claimed for processing. Doubles as the lease timestamp: a `Processing` order whose
    /// claim is older than the configured lease is eligible for reclaim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_at: Option<DateTime<Utc>>,
}

//--------------------------------------      NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Opaque display string identifying the ordering client.
    pub client: String,
    /// Opaque display string identifying the ordered product.
    pub product: String,
    /// The order amount.
    pub value: Money,
}

impl NewOrder {
    pub fn new<S1: Into<String>, S2: Into<String>>(client: S1, product: S2, value: Money) -> Self {
        Self { client: client.into(), product: product.into(), value }
    }
}

//--------------------------------------    OutboxMessage      -------------------------------------------------------
/// A durable "to-be-published" record, written in the same transaction as the order it describes.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OutboxMessage {
    pub id: OutboxId,
    /// String form of the related order id. Joined back to the order by the relay.
    pub correlation_id: String,
    pub event_type: String,
    /// Serialized snapshot of the event data, captured at creation time and never re-derived.
    pub payload: String,
    /// The poll ordering key. The relay drains records oldest-first.
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Number of failed relay attempts. Drives the retry backoff schedule.
    pub attempts: i64,
    pub next_attempt_at: DateTime<Utc>,
    /// Set once `attempts` exceeds the dead-letter cap. Dead records are never polled again.
    pub dead: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_ids_are_valid_uuids() {
        let id = OrderId::new();
        let parsed: OrderId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_order_ids_are_rejected() {
        assert!("not-an-id".parse::<OrderId>().is_err());
        assert!("".parse::<OrderId>().is_err());
        assert!("d9428888-122b-11e1-b85c-61cd3cbb3210".parse::<OrderId>().is_ok());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [OrderStatus::Pending, OrderStatus::Processing, OrderStatus::Finalized] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("Cancelled".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn order_serializes_with_camel_case_keys() {
        let order = Order {
            id: OrderId::new(),
            client: "Acme".to_string(),
            product: "Widget".to_string(),
            value: Money::from_hundredths(1999),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processing_at: None,
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "Pending");
        assert_eq!(json["value"], 19.99);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("processingAt").is_none());
    }
}
