//! Endpoint tests for the order routes, run against a throwaway SQLite database.
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use ofp_engine::{
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    FulfilmentConfig,
    OrderFlowApi,
    SqliteDatabase,
};
use serde_json::{json, Value};

use crate::{
    routes::{create_order, fetch_order, fetch_orders, health},
    server::json_config,
};

async fn new_api() -> OrderFlowApi<SqliteDatabase> {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let config = FulfilmentConfig { processing_delay: Duration::from_millis(10), ..Default::default() };
    OrderFlowApi::new(db, config)
}

macro_rules! test_service {
    ($api:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($api))
                .app_data(json_config())
                .service(health)
                .service(create_order)
                .service(fetch_orders)
                .service(fetch_order),
        )
        .await
    };
}

#[actix_web::test]
async fn health_check() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::get().uri("/health").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = test::read_body(res).await;
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn create_order_returns_created_with_location() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::post()
        .uri("/orders")
        .set_json(json!({"client": "Acme", "product": "Widget", "value": 19.99}))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let location = res.headers().get("Location").expect("Location header missing").to_str().unwrap().to_string();
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["client"], "Acme");
    assert_eq!(body["product"], "Widget");
    assert_eq!(body["value"], 19.99);
    assert_eq!(location, format!("/orders/{}", body["id"].as_str().unwrap()));
}

#[actix_web::test]
async fn create_order_rejects_malformed_bodies() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::post().uri("/orders").set_json(json!({"client": "Acme"})).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].as_str().unwrap().contains("request body"), "unexpected error body: {body}");
}

#[actix_web::test]
async fn create_order_rejects_out_of_range_values() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::post()
        .uri("/orders")
        .set_json(json!({"client": "Acme", "product": "Widget", "value": "9223372036854775807"}))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn fetch_orders_lists_newest_first() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    for (client, value) in [("Acme", 10.00), ("Globex", 25.50)] {
        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({"client": client, "product": "Widget", "value": value}))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        // Creation timestamps are the sort key, so keep them distinct.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let req = test::TestRequest::get().uri("/orders").to_request();
    let orders: Value = test::call_and_read_body_json(&app, req).await;
    let orders = orders.as_array().expect("expected a JSON array");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["client"], "Globex");
    assert_eq!(orders[1]["client"], "Acme");
}

#[actix_web::test]
async fn fetch_order_by_id() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::post()
        .uri("/orders")
        .set_json(json!({"client": "Acme", "product": "Widget", "value": 5.00}))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();

    let req = test::TestRequest::get().uri(&format!("/orders/{id}")).to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["status"], "Pending");
}

#[actix_web::test]
async fn fetch_unknown_order_is_not_found() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::get().uri("/orders/11111111-2222-3333-4444-555555555555").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn fetch_order_with_malformed_id_is_bad_request() {
    let _ = env_logger::try_init().ok();
    let app = test_service!(new_api().await);
    let req = test::TestRequest::get().uri("/orders/not-a-uuid").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].as_str().unwrap().contains("request path"));
}
