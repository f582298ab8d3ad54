use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use ofp_engine::{events::EventPublisher, OrderFlowApi, SqliteDatabase};
use tokio::sync::watch;

use crate::{
    broker::{RedisPublisher, RedisQueueConsumer},
    config::ServerConfig,
    errors::ServerError,
    listener::start_queue_listener,
    relay_worker::start_outbox_relay,
    routes::{create_order, fetch_order, fetch_orders, health},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    sqlx::migrate!("../ofp_engine/src/sqlite/migrations")
        .run(db.pool())
        .await
        .map_err(|e| ServerError::InitializeError(format!("Could not run database migrations. {e}")))?;

    let publisher: Option<Arc<dyn EventPublisher>> = match &config.broker {
        Some(broker) => {
            let publisher = RedisPublisher::connect(broker.url.reveal(), &broker.queue)
                .await
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            Some(Arc::new(publisher))
        },
        None => None,
    };

    // Both background consumers share one shutdown signal, flipped when the HTTP server exits.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_api = build_api(db.clone(), publisher.clone(), &config);
    let relay = start_outbox_relay(worker_api.clone(), config.poll_interval, shutdown_rx.clone());
    let listener = match &config.broker {
        Some(broker) => {
            let consumer = RedisQueueConsumer::connect(broker.url.reveal(), &broker.queue)
                .await
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            Some(start_queue_listener(worker_api, consumer, shutdown_rx))
        },
        None => None,
    };

    let srv = create_server_instance(config, db, publisher)?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    info!("🚀️ HTTP server stopped. Signalling workers to shut down.");
    let _ = shutdown_tx.send(true);
    let _ = relay.await;
    if let Some(listener) = listener {
        let _ = listener.await;
    }
    result
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    publisher: Option<Arc<dyn EventPublisher>>,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let api = build_api(db.clone(), publisher.clone(), &config);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("ofp::access_log"))
            .app_data(web::Data::new(api))
            .app_data(json_config())
            .service(health)
            .service(create_order)
            .service(fetch_orders)
            .service(fetch_order)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Routes JSON extractor failures through [`ServerError`] so malformed bodies get the standard error body.
pub(crate) fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into())
}

fn build_api(
    db: SqliteDatabase,
    publisher: Option<Arc<dyn EventPublisher>>,
    config: &ServerConfig,
) -> OrderFlowApi<SqliteDatabase> {
    let api = OrderFlowApi::new(db, config.fulfilment_config());
    match publisher {
        Some(publisher) => api.with_publisher(publisher),
        None => api,
    }
}
