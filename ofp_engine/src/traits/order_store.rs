use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::db_types::{NewOrder, Order, OrderId, OutboxId, OutboxMessage};

/// Exponential backoff schedule for failed outbox deliveries.
///
/// A record that fails on attempt `n` is rescheduled `base * 2^n` in the future (the exponent is clamped so the delay
/// cannot overflow). Once `max_attempts` is reached the record is dead-lettered and never polled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: StdDuration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: StdDuration::from_secs(2), max_attempts: 12 }
    }
}

impl BackoffPolicy {
    /// The delay to apply after the given (1-based) failed attempt count.
    pub fn delay_after(&self, attempts: i64) -> Duration {
        let exponent = attempts.clamp(0, 16) as u32;
        let millis = (self.base.as_millis() as i64).saturating_mul(1i64 << exponent);
        Duration::milliseconds(millis)
    }

    pub fn is_exhausted(&self, attempts: i64) -> bool {
        attempts >= i64::from(self.max_attempts)
    }
}

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Outbox record {0} does not exist")]
    OutboxNotFound(OutboxId),
    #[error("Order {0} is not in a state that permits this transition")]
    InvalidTransition(OrderId),
    #[error("Could not serialize the outbox payload: {0}")]
    PayloadSerialization(#[from] serde_json::Error),
}

/// This trait defines the storage behaviour required by the order pipeline.
///
/// The contract covers:
/// * The atomic order-plus-outbox write that makes the outbox pattern work.
/// * Guarded status transitions expressed as single conditional updates, so two racing consumers can never both win
///   a claim.
/// * Outbox bookkeeping for the relay: due-record polling, processed marking and failure/backoff recording.
#[allow(async_fn_in_trait)]
pub trait OrderStore: Clone {
    /// The URL of the backing database.
    fn url(&self) -> &str;

    /// Creates the order (status `Pending`) and its `OrderCreated` outbox record in a single atomic transaction.
    /// Either both rows exist afterwards, or neither does.
    async fn create_order_with_outbox(&self, order: NewOrder) -> Result<(Order, OutboxMessage), OrderStoreError>;

    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, OrderStoreError>;

    /// All orders, most recently created first.
    async fn fetch_orders(&self) -> Result<Vec<Order>, OrderStoreError>;

    /// Unprocessed, non-dead outbox records whose next attempt is due, oldest first, capped at `limit`.
    async fn fetch_due_outbox(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, OrderStoreError>;

    /// All outbox records whose correlation id matches the given value. Intended for diagnostics and tests.
    async fn fetch_outbox_for_correlation(&self, correlation_id: &str) -> Result<Vec<OutboxMessage>, OrderStoreError>;

    /// Attempts to claim the order for processing with a single atomic conditional update.
    ///
    /// The claim succeeds if the order is `Pending`, or if it is `Processing` but its claim timestamp is older than
    /// `lease` (a previous consumer crashed mid-transition). On success the order is moved to `Processing`, its claim
    /// timestamp is refreshed, and the updated row is returned. `None` means the caller lost the race, the order has
    /// already been handled, or no such order exists; the caller must not mutate the order in that case.
    async fn try_claim_order(&self, id: &OrderId, lease: Duration) -> Result<Option<Order>, OrderStoreError>;

    /// Moves a `Processing` order to `Finalized`. Fails with [`OrderStoreError::InvalidTransition`] if the order is
    /// not currently `Processing`.
    async fn finalize_order(&self, id: &OrderId) -> Result<Order, OrderStoreError>;

    /// The relay's completion step: finalizes the order and marks its outbox record processed in one transaction.
    async fn finalize_order_and_mark_processed(
        &self,
        id: &OrderId,
        outbox_id: &OutboxId,
    ) -> Result<Order, OrderStoreError>;

    /// Marks an outbox record processed. Idempotent: marking an already-processed record is a no-op.
    async fn mark_outbox_processed(&self, outbox_id: &OutboxId) -> Result<(), OrderStoreError>;

    /// Records a failed processing attempt: bumps the attempt count, schedules the next attempt according to
    /// `policy`, and dead-letters the record once the attempt cap is reached. Returns the updated record.
    async fn record_outbox_failure(
        &self,
        outbox_id: &OutboxId,
        policy: &BackoffPolicy,
    ) -> Result<OutboxMessage, OrderStoreError>;
}
