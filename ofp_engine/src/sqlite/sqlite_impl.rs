//! `SqliteDatabase` is a concrete implementation of the order pipeline storage backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the [`OrderStore`] trait. Multi-row guarantees
//! (order + outbox, finalize + mark processed) are provided by wrapping the low-level statement functions in a pool
//! transaction.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use sqlx::SqlitePool;

use super::db::{db_url, new_pool, orders, outbox};
use crate::{
    db_types::{NewOrder, Order, OrderId, OutboxId, OutboxMessage},
    traits::{BackoffPolicy, OrderStore, OrderStoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new connection pool using the database URL from the environment, or the default.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl OrderStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_order_with_outbox(&self, order: NewOrder) -> Result<(Order, OutboxMessage), OrderStoreError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        let msg = outbox::insert_for_order(&order, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] and outbox record {} committed atomically", order.id, msg.id);
        Ok((order, msg))
    }

    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_id(id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_orders(&self) -> Result<Vec<Order>, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_all_orders(&mut conn).await?;
        Ok(orders)
    }

    async fn fetch_due_outbox(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let messages = outbox::fetch_due(now, limit, &mut conn).await?;
        Ok(messages)
    }

    async fn fetch_outbox_for_correlation(&self, correlation_id: &str) -> Result<Vec<OutboxMessage>, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let messages = outbox::fetch_for_correlation(correlation_id, &mut conn).await?;
        Ok(messages)
    }

    async fn try_claim_order(&self, id: &OrderId, lease: Duration) -> Result<Option<Order>, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::claim_order(id, lease, &mut conn).await
    }

    async fn finalize_order(&self, id: &OrderId) -> Result<Order, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::finalize_order(id, &mut conn).await?;
        order.ok_or_else(|| OrderStoreError::InvalidTransition(id.clone()))
    }

    async fn finalize_order_and_mark_processed(
        &self,
        id: &OrderId,
        outbox_id: &OutboxId,
    ) -> Result<Order, OrderStoreError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::finalize_order(id, &mut tx)
            .await?
            .ok_or_else(|| OrderStoreError::InvalidTransition(id.clone()))?;
        outbox::mark_processed(outbox_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] finalized and outbox record {outbox_id} marked processed", order.id);
        Ok(order)
    }

    async fn mark_outbox_processed(&self, outbox_id: &OutboxId) -> Result<(), OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        outbox::mark_processed(outbox_id, &mut conn).await
    }

    async fn record_outbox_failure(
        &self,
        outbox_id: &OutboxId,
        policy: &BackoffPolicy,
    ) -> Result<OutboxMessage, OrderStoreError> {
        let mut conn = self.pool.acquire().await?;
        let updated = outbox::record_failure(outbox_id, policy, &mut conn).await?;
        updated.ok_or_else(|| OrderStoreError::OutboxNotFound(outbox_id.clone()))
    }
}
