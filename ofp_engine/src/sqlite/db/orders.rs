use chrono::{Duration, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatus},
    traits::OrderStoreError,
};

/// Inserts a new order with status `Pending` using the given connection. This is not atomic on its own. You can embed
/// this call inside a transaction if you need atomicity, and pass `&mut *tx` as the connection argument.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, OrderStoreError> {
    let now = Utc::now();
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (id, client, product, value, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *;
        "#,
    )
    .bind(OrderId::new())
    .bind(order.client)
    .bind(order.product)
    .bind(order.value)
    .bind(OrderStatus::Pending.to_string())
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Order [{}] inserted with status {}", order.id, order.status);
    Ok(order)
}

pub async fn fetch_order_by_id(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// All orders, most recently created first.
pub async fn fetch_all_orders(conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let orders = sqlx::query_as("SELECT * FROM orders ORDER BY created_at DESC").fetch_all(conn).await?;
    Ok(orders)
}

/// Tries to claim the order for processing.
///
/// The claim is a single conditional update, so under concurrent execution at most one caller observes a returned
/// row. A `Processing` order whose claim timestamp predates the lease cutoff is treated as abandoned and may be
/// re-claimed.
pub async fn claim_order(
    id: &OrderId,
    lease: Duration,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, OrderStoreError> {
    let now = Utc::now();
    let reclaim_cutoff = now - lease;
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET status = $2, processing_at = $3, updated_at = $3
            WHERE id = $1 AND (status = $4 OR (status = $2 AND processing_at <= $5))
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(OrderStatus::Processing.to_string())
    .bind(now)
    .bind(OrderStatus::Pending.to_string())
    .bind(reclaim_cutoff)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Moves a `Processing` order to `Finalized`, clearing the claim timestamp. Returns `None` if the order is missing
/// or not currently `Processing`.
pub async fn finalize_order(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, OrderStoreError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET status = $2, updated_at = $3, processing_at = NULL
            WHERE id = $1 AND status = $4
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(OrderStatus::Finalized.to_string())
    .bind(Utc::now())
    .bind(OrderStatus::Processing.to_string())
    .fetch_optional(conn)
    .await?;
    Ok(order)
}
