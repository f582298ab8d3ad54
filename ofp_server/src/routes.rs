//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate
//! module. Keep this module neat and tidy 🙏
use actix_web::{get, http::header, post, web, HttpResponse, Responder};
use log::*;
use ofp_engine::{db_types::OrderId, OrderFlowApi, SqliteDatabase};

use crate::{data_objects::OrderCreateRequest, errors::ServerError};

#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

#[post("/orders")]
pub async fn create_order(
    api: web::Data<OrderFlowApi<SqliteDatabase>>,
    body: web::Json<OrderCreateRequest>,
) -> Result<HttpResponse, ServerError> {
    let req = body.into_inner();
    debug!("💻️ New order request from client '{}' for '{}'", req.client, req.product);
    let order = api.process_new_order(req.into()).await?;
    info!("💻️ Order {} accepted", order.id);
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("/orders/{}", order.id)))
        .json(order))
}

#[get("/orders")]
pub async fn fetch_orders(api: web::Data<OrderFlowApi<SqliteDatabase>>) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received request for all orders");
    let orders = api.fetch_orders().await?;
    Ok(HttpResponse::Ok().json(orders))
}

#[get("/orders/{id}")]
pub async fn fetch_order(
    api: web::Data<OrderFlowApi<SqliteDatabase>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let id = id.parse::<OrderId>().map_err(|e| ServerError::InvalidRequestPath(e.to_string()))?;
    trace!("💻️ Received request for order {id}");
    match api.fetch_order(&id).await? {
        Some(order) => Ok(HttpResponse::Ok().json(order)),
        None => Err(ServerError::NoRecordFound(format!("Order {id} does not exist."))),
    }
}
