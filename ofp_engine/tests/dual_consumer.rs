//! The concurrency-critical tests: two independent consumers racing for the same order.
use std::time::Duration;

use ofp_common::Money;
use ofp_engine::{
    db_types::{NewOrder, OrderStatus},
    BackoffPolicy,
    Fulfilment,
    FulfilmentConfig,
    OrderFlowApi,
    OrderStore,
    RelayOutcome,
    SqliteDatabase,
};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

async fn new_test_api(config: FulfilmentConfig) -> (SqliteDatabase, OrderFlowApi<SqliteDatabase>) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let api = OrderFlowApi::new(db.clone(), config);
    (db, api)
}

#[tokio::test]
async fn racing_consumers_finalize_exactly_once() {
    let config = FulfilmentConfig {
        processing_delay: Duration::from_millis(100),
        claim_lease: Duration::from_secs(30),
        backoff: BackoffPolicy::default(),
        batch_size: 50,
    };
    let (db, api) = new_test_api(config).await;
    let order = api
        .process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(1999)))
        .await
        .expect("Error creating order");
    let msg = db.fetch_outbox_for_correlation(order.id.as_str()).await.unwrap().remove(0);

    // The relay and the broker listener race for the same Pending order.
    let relay = api.process_outbox_message(&msg);
    let listener = api.fulfil_order(&order.id);
    let (relay_outcome, listener_outcome) = tokio::join!(relay, listener);
    let relay_outcome = relay_outcome.expect("relay path errored");
    let listener_outcome = listener_outcome.expect("listener path errored");

    let relay_won = matches!(relay_outcome, RelayOutcome::Finalized(_));
    let listener_won = matches!(listener_outcome, Fulfilment::Completed(_));
    assert!(
        relay_won ^ listener_won,
        "exactly one consumer may win the claim (relay: {relay_outcome:?}, listener: {listener_outcome:?})"
    );

    let done = api.fetch_order(&order.id).await.unwrap().unwrap();
    assert_eq!(done.status, OrderStatus::Finalized, "the final state converges regardless of the winner");
}

#[tokio::test]
async fn loser_of_the_race_observes_already_handled() {
    let config = FulfilmentConfig {
        processing_delay: Duration::from_millis(10),
        claim_lease: Duration::from_secs(30),
        backoff: BackoffPolicy::default(),
        batch_size: 50,
    };
    let (_db, api) = new_test_api(config).await;
    let order = api
        .process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100)))
        .await
        .expect("Error creating order");

    let first = api.fulfil_order(&order.id).await.unwrap();
    assert!(matches!(first, Fulfilment::Completed(_)));

    // A duplicate delivery of the same event is a clean no-op.
    let second = api.fulfil_order(&order.id).await.unwrap();
    match second {
        Fulfilment::AlreadyHandled(order) => assert_eq!(order.status, OrderStatus::Finalized),
        other => panic!("expected AlreadyHandled, got {other:?}"),
    }
}

#[tokio::test]
async fn live_lease_blocks_a_second_claim() {
    let config = FulfilmentConfig {
        processing_delay: Duration::from_millis(10),
        claim_lease: Duration::from_secs(30),
        backoff: BackoffPolicy::default(),
        batch_size: 50,
    };
    let (db, api) = new_test_api(config).await;
    let order = api
        .process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100)))
        .await
        .expect("Error creating order");

    // A consumer claims the order and then goes quiet, holding a live lease.
    let claimed = db.try_claim_order(&order.id, chrono::Duration::seconds(30)).await.unwrap();
    assert!(claimed.is_some());

    let outcome = api.fulfil_order(&order.id).await.unwrap();
    match outcome {
        Fulfilment::AlreadyHandled(order) => assert_eq!(order.status, OrderStatus::Processing),
        other => panic!("expected AlreadyHandled while the lease is live, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_lease_is_reclaimed() {
    let config = FulfilmentConfig {
        processing_delay: Duration::from_millis(10),
        claim_lease: Duration::from_millis(200),
        backoff: BackoffPolicy::default(),
        batch_size: 50,
    };
    let (db, api) = new_test_api(config).await;
    let order = api
        .process_new_order(NewOrder::new("Acme", "Widget", Money::from_hundredths(100)))
        .await
        .expect("Error creating order");

    // Simulate a consumer that crashed between the claim and the finalize.
    let claimed = db.try_claim_order(&order.id, chrono::Duration::milliseconds(200)).await.unwrap();
    assert!(claimed.is_some());
    let stuck = api.fetch_order(&order.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, OrderStatus::Processing);

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Once the lease has lapsed, the next consumer reclaims the order and drives it home.
    let outcome = api.fulfil_order(&order.id).await.unwrap();
    assert!(matches!(outcome, Fulfilment::Completed(_)), "expected a reclaim, got {outcome:?}");
    let done = api.fetch_order(&order.id).await.unwrap().unwrap();
    assert_eq!(done.status, OrderStatus::Finalized);
}

#[tokio::test]
async fn fulfilling_an_unknown_order_is_not_an_error() {
    let config = FulfilmentConfig {
        processing_delay: Duration::from_millis(10),
        claim_lease: Duration::from_secs(30),
        backoff: BackoffPolicy::default(),
        batch_size: 50,
    };
    let (_db, api) = new_test_api(config).await;
    let ghost = "11111111-2222-3333-4444-555555555555".parse().unwrap();
    let outcome = api.fulfil_order(&ghost).await.unwrap();
    assert_eq!(outcome, Fulfilment::NotFound);
}
