//! The broker listener: the push-path consumer of `OrderCreated` events.
//!
//! Every delivery funnels into the same claim-then-finalize logic the outbox relay uses, so duplicate deliveries
//! and relay/listener races resolve to exactly one fulfilment per order. The disposition rules are deliberately
//! ack-happy: only a storage error is worth a redelivery, everything else is terminal for the message.
use std::time::Duration;

use log::*;
use ofp_engine::{
    db_types::OrderId,
    events::{EventEnvelope, ORDER_CREATED},
    Fulfilment,
    OrderFlowApi,
    SqliteDatabase,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::broker::RedisQueueConsumer;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// What to do with a delivery once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDisposition {
    /// The message is settled and must not be redelivered.
    Ack,
    /// A transient failure. Return the message to the queue for another attempt.
    Retry,
}

/// Decides the fate of a single delivery. Pure with respect to the broker: all queue interaction happens in the
/// listener loop, which makes this directly testable against a database.
pub async fn handle_delivery(api: &OrderFlowApi<SqliteDatabase>, envelope: &EventEnvelope) -> DeliveryDisposition {
    if envelope.event_type != ORDER_CREATED {
        debug!("📥️ Ignoring message {} of foreign type '{}'", envelope.message_id, envelope.event_type);
        return DeliveryDisposition::Ack;
    }
    let order_id = match envelope.correlation_id.parse::<OrderId>() {
        Ok(id) => id,
        Err(e) => {
            warn!("📥️ Message {} has an unusable correlation id: {e}. Discarding it.", envelope.message_id);
            return DeliveryDisposition::Ack;
        },
    };
    match api.fulfil_order(&order_id).await {
        Ok(Fulfilment::Completed(order)) => {
            info!("📥️ Order [{}] fulfilled from broker delivery", order.id);
            DeliveryDisposition::Ack
        },
        Ok(Fulfilment::AlreadyHandled(order)) => {
            debug!("📥️ Order [{}] is already {}; delivery is a no-op", order.id, order.status);
            DeliveryDisposition::Ack
        },
        Ok(Fulfilment::NotFound) => {
            warn!("📥️ Order [{order_id}] from message {} does not exist. Discarding it.", envelope.message_id);
            DeliveryDisposition::Ack
        },
        Err(e) => {
            error!("📥️ Error fulfilling order [{order_id}]: {e}. The message will be redelivered.");
            DeliveryDisposition::Retry
        },
    }
}

/// Starts the queue listener worker. Runs until the shutdown signal fires.
pub fn start_queue_listener(
    api: OrderFlowApi<SqliteDatabase>,
    mut consumer: RedisQueueConsumer,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📥️ Queue listener started on '{}'", consumer.queue());
        loop {
            let received = tokio::select! {
                r = consumer.receive(RECEIVE_TIMEOUT) => r,
                _ = shutdown.changed() => {
                    info!("📥️ Queue listener shutting down");
                    return;
                },
            };
            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    error!("📥️ Broker receive failed: {e}. Retrying shortly.");
                    tokio::time::sleep(RECEIVE_TIMEOUT).await;
                    continue;
                },
            };
            let disposition = handle_delivery(&api, &delivery.envelope).await;
            let settled = match disposition {
                DeliveryDisposition::Ack => consumer.ack(&delivery).await,
                DeliveryDisposition::Retry => consumer.abandon(&delivery).await,
            };
            if let Err(e) = settled {
                error!("📥️ Could not settle message {}: {e}", delivery.envelope.message_id);
            }
        }
    })
}

#[cfg(test)]
mod test {
    use ofp_common::Money;
    use ofp_engine::{
        db_types::{NewOrder, OrderStatus},
        test_utils::prepare_env::{prepare_test_env, random_db_path},
        FulfilmentConfig,
        OrderStore,
    };

    use super::*;

    async fn test_api() -> (SqliteDatabase, OrderFlowApi<SqliteDatabase>) {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.unwrap();
        let config = FulfilmentConfig { processing_delay: Duration::from_millis(10), ..Default::default() };
        (db.clone(), OrderFlowApi::new(db, config))
    }

    fn envelope(event_type: &str, correlation_id: &str) -> EventEnvelope {
        EventEnvelope {
            message_id: "msg-1".to_string(),
            correlation_id: correlation_id.to_string(),
            event_type: event_type.to_string(),
            body: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn foreign_event_types_are_acked_without_side_effects() {
        let (_db, api) = test_api().await;
        let order = api.process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100))).await.unwrap();
        let disposition = handle_delivery(&api, &envelope("InvoicePaid", order.id.as_str())).await;
        assert_eq!(disposition, DeliveryDisposition::Ack);
        let unchanged = api.fetch_order(&order.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn malformed_correlation_ids_are_discarded() {
        let (_db, api) = test_api().await;
        let disposition = handle_delivery(&api, &envelope(ORDER_CREATED, "not-a-uuid")).await;
        assert_eq!(disposition, DeliveryDisposition::Ack);
    }

    #[tokio::test]
    async fn unknown_orders_are_discarded() {
        let (_db, api) = test_api().await;
        let ghost = "11111111-2222-3333-4444-555555555555";
        let disposition = handle_delivery(&api, &envelope(ORDER_CREATED, ghost)).await;
        assert_eq!(disposition, DeliveryDisposition::Ack);
    }

    #[tokio::test]
    async fn a_valid_delivery_fulfils_the_order() {
        let (db, api) = test_api().await;
        let order = api.process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100))).await.unwrap();
        let disposition = handle_delivery(&api, &envelope(ORDER_CREATED, order.id.as_str())).await;
        assert_eq!(disposition, DeliveryDisposition::Ack);
        let done = db.fetch_order(&order.id).await.unwrap().unwrap();
        assert_eq!(done.status, OrderStatus::Finalized);
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_acked() {
        let (_db, api) = test_api().await;
        let order = api.process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100))).await.unwrap();
        let env = envelope(ORDER_CREATED, order.id.as_str());
        assert_eq!(handle_delivery(&api, &env).await, DeliveryDisposition::Ack);
        assert_eq!(handle_delivery(&api, &env).await, DeliveryDisposition::Ack);
        let done = api.fetch_order(&order.id).await.unwrap().unwrap();
        assert_eq!(done.status, OrderStatus::Finalized);
    }
}
