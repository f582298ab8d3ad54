use std::{
    fmt::{Debug, Display},
    sync::Arc,
    time::Duration as StdDuration,
};

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{NewOrder, Order, OrderId, OutboxId, OutboxMessage},
    events::{EventEnvelope, EventPublisher},
    traits::{BackoffPolicy, OrderStore, OrderStoreError},
};

/// Tuning knobs for the fulfilment pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FulfilmentConfig {
    /// How long the simulated fulfilment work takes. Stands in for real I/O-bound work; no transaction is held open
    /// for its duration.
    pub processing_delay: StdDuration,
    /// How long a `Processing` claim is honoured before the order is considered abandoned and may be re-claimed.
    /// Must comfortably exceed `processing_delay`, or a slow consumer will have its claim stolen mid-flight.
    pub claim_lease: StdDuration,
    pub backoff: BackoffPolicy,
    /// Maximum number of outbox records drained per relay cycle.
    pub batch_size: i64,
}

impl Default for FulfilmentConfig {
    fn default() -> Self {
        Self {
            processing_delay: StdDuration::from_secs(5),
            claim_lease: StdDuration::from_secs(60),
            backoff: BackoffPolicy::default(),
            batch_size: 50,
        }
    }
}

impl FulfilmentConfig {
    fn lease(&self) -> Duration {
        Duration::from_std(self.claim_lease).unwrap_or_else(|_| Duration::seconds(60))
    }
}

/// Outcome of the shared completion logic for a single order.
#[derive(Debug, Clone, PartialEq)]
pub enum Fulfilment {
    /// This caller won the claim and drove the order to `Finalized`.
    Completed(Order),
    /// The order exists but was not claimable: another consumer already advanced it (or holds a live claim).
    AlreadyHandled(Order),
    /// No such order. Terminal; there is nothing to retry.
    NotFound,
}

/// Outcome of driving a single outbox record through the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Finalized(Order),
    AlreadyHandled,
    OrderMissing,
    MalformedCorrelation,
}

/// Counters for one relay cycle, suitable for the worker loop's log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub scanned: usize,
    pub finalized: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} finalized, {} skipped, {} failed ({} dead-lettered)",
            self.scanned, self.finalized, self.skipped, self.failed, self.dead_lettered
        )
    }
}

/// `OrderFlowApi` is the primary API of the pipeline. It owns order ingestion (the atomic order-plus-outbox write
/// followed by a best-effort publish) and the completion logic shared by the outbox relay and the broker listener.
///
/// Both consumers funnel through the same claim-then-finalize procedure, so whichever of them reaches a `Pending`
/// order first wins; the other observes a lost claim and treats the order as already handled. That is the whole
/// idempotency story under at-least-once delivery.
pub struct OrderFlowApi<B> {
    db: B,
    publisher: Option<Arc<dyn EventPublisher>>,
    config: FulfilmentConfig,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B: Clone> Clone for OrderFlowApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), publisher: self.publisher.clone(), config: self.config }
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, config: FulfilmentConfig) -> Self {
        Self { db, publisher: None, config }
    }

    /// Attaches a broker publisher. Without one, order creation still works; only the push path is skipped.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &FulfilmentConfig {
        &self.config
    }
}

impl<B> OrderFlowApi<B>
where B: OrderStore
{
    /// Submit a new order to the pipeline.
    ///
    /// The order (status `Pending`) and its `OrderCreated` outbox record are written in one atomic transaction; if
    /// that write fails, the error propagates to the caller and nothing was stored. Afterwards the event is pushed to
    /// the broker on a best-effort basis: any publish failure is logged and swallowed, because the outbox record is
    /// the delivery guarantee, not the push.
    pub async fn process_new_order(&self, order: NewOrder) -> Result<Order, OrderStoreError> {
        let (order, msg) = self.db.create_order_with_outbox(order).await?;
        debug!("🔄️📦️ Order [{}] accepted with outbox record {}", order.id, msg.id);
        self.publish_best_effort(&msg).await;
        Ok(order)
    }

    async fn publish_best_effort(&self, msg: &OutboxMessage) {
        let Some(publisher) = &self.publisher else {
            trace!("🔄️📦️ No broker publisher configured. Outbox record {} waits for the relay.", msg.id);
            return;
        };
        let envelope = EventEnvelope::for_outbox(msg);
        match publisher.publish(envelope).await {
            Ok(()) => debug!("🔄️📦️ Published {} event for order [{}]", msg.event_type, msg.correlation_id),
            Err(e) => warn!(
                "🔄️📦️ Best-effort publish of outbox record {} failed: {e}. The relay will deliver it instead.",
                msg.id
            ),
        }
    }

    pub async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, OrderStoreError> {
        self.db.fetch_order(id).await
    }

    pub async fn fetch_orders(&self) -> Result<Vec<Order>, OrderStoreError> {
        self.db.fetch_orders().await
    }

    /// The completion logic, as invoked from a pushed broker delivery.
    ///
    /// Claim the order with a single atomic conditional update, simulate the fulfilment work, then finalize. A lost
    /// claim is not an error: it means the relay (or an earlier delivery of the same message) got there first.
    pub async fn fulfil_order(&self, id: &OrderId) -> Result<Fulfilment, OrderStoreError> {
        self.claim_and_complete(id, None).await
    }

    async fn claim_and_complete(&self, id: &OrderId, outbox_id: Option<&OutboxId>) -> Result<Fulfilment, OrderStoreError> {
        match self.db.try_claim_order(id, self.config.lease()).await? {
            Some(_) => {
                info!("🔄️📦️ Order [{id}] claimed; status is now Processing");
                // The claim commit is what makes the in-flight state observable. No transaction is held here.
                tokio::time::sleep(self.config.processing_delay).await;
                let order = match outbox_id {
                    Some(outbox_id) => self.db.finalize_order_and_mark_processed(id, outbox_id).await?,
                    None => self.db.finalize_order(id).await?,
                };
                info!("🔄️📦️ Order [{id}] finalized");
                Ok(Fulfilment::Completed(order))
            },
            None => match self.db.fetch_order(id).await? {
                Some(order) => {
                    debug!("🔄️📦️ Order [{id}] is already {} and was not claimed", order.status);
                    Ok(Fulfilment::AlreadyHandled(order))
                },
                None => Ok(Fulfilment::NotFound),
            },
        }
    }

    /// Drives a single outbox record to a terminal state, as the relay does for each row it polls.
    ///
    /// Malformed correlation ids, vanished orders and already-advanced orders are all terminal: the record is marked
    /// processed and will never be re-selected. Only a storage error leaves the record untouched for retry.
    pub async fn process_outbox_message(&self, msg: &OutboxMessage) -> Result<RelayOutcome, OrderStoreError> {
        let order_id = match msg.correlation_id.parse::<OrderId>() {
            Ok(id) => id,
            Err(e) => {
                warn!("📤️ Outbox record {} has an unusable correlation id: {e}. Marking it processed.", msg.id);
                self.db.mark_outbox_processed(&msg.id).await?;
                return Ok(RelayOutcome::MalformedCorrelation);
            },
        };
        match self.claim_and_complete(&order_id, Some(&msg.id)).await? {
            Fulfilment::Completed(order) => Ok(RelayOutcome::Finalized(order)),
            Fulfilment::AlreadyHandled(order) => {
                debug!(
                    "📤️ Order [{}] is already {}; marking outbox record {} processed without touching it",
                    order.id, order.status, msg.id
                );
                self.db.mark_outbox_processed(&msg.id).await?;
                Ok(RelayOutcome::AlreadyHandled)
            },
            Fulfilment::NotFound => {
                warn!("📤️ Order [{order_id}] referenced by outbox record {} no longer exists", msg.id);
                self.db.mark_outbox_processed(&msg.id).await?;
                Ok(RelayOutcome::OrderMissing)
            },
        }
    }

    /// One relay scan: fetch the due outbox records oldest-first and drive each one independently.
    ///
    /// Failure is row-scoped, never cycle-scoped. A row that errors is logged, rescheduled with backoff (or
    /// dead-lettered past the attempt cap) and the cycle moves on to the next row. Only a failure of the scan itself
    /// is returned as an error.
    pub async fn run_relay_cycle(&self) -> Result<CycleStats, OrderStoreError> {
        let due = self.db.fetch_due_outbox(Utc::now(), self.config.batch_size).await?;
        let mut stats = CycleStats { scanned: due.len(), ..Default::default() };
        for msg in &due {
            match self.process_outbox_message(msg).await {
                Ok(RelayOutcome::Finalized(_)) => stats.finalized += 1,
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    error!("📤️ Error processing outbox record {}: {e}. It stays eligible for retry.", msg.id);
                    stats.failed += 1;
                    match self.db.record_outbox_failure(&msg.id, &self.config.backoff).await {
                        Ok(updated) if updated.dead => {
                            error!(
                                "📤️ Outbox record {} failed {} times and has been dead-lettered",
                                msg.id, updated.attempts
                            );
                            stats.dead_lettered += 1;
                        },
                        Ok(updated) => debug!(
                            "📤️ Outbox record {} rescheduled for {} (attempt {})",
                            msg.id, updated.next_attempt_at, updated.attempts
                        ),
                        Err(e) => error!("📤️ Could not record the failure for outbox record {}: {e}", msg.id),
                    }
                },
            }
        }
        Ok(stats)
    }
}
