use chrono::{DateTime, Utc};
use log::{debug, warn};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Order, OutboxId, OutboxMessage},
    events::{OrderCreatedEvent, ORDER_CREATED},
    traits::{BackoffPolicy, OrderStoreError},
};

/// Inserts the `OrderCreated` outbox record for a freshly created order. The payload is a serialized snapshot of the
/// order's identifying fields, captured here and never re-derived. Call this inside the same transaction as the
/// order insert.
pub async fn insert_for_order(order: &Order, conn: &mut SqliteConnection) -> Result<OutboxMessage, OrderStoreError> {
    let payload = serde_json::to_string(&OrderCreatedEvent::from(order))?;
    let now = Utc::now();
    let msg: OutboxMessage = sqlx::query_as(
        r#"
            INSERT INTO outbox_messages (id, correlation_id, event_type, payload, created_at, processed, attempts, next_attempt_at, dead)
            VALUES ($1, $2, $3, $4, $5, 0, 0, $5, 0)
            RETURNING *;
        "#,
    )
    .bind(OutboxId::new())
    .bind(order.id.as_str())
    .bind(ORDER_CREATED)
    .bind(payload)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Outbox record {} written for order [{}]", msg.id, order.id);
    Ok(msg)
}

/// Unprocessed, non-dead records whose next attempt is due, oldest first.
pub async fn fetch_due(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxMessage>, sqlx::Error> {
    let messages = sqlx::query_as(
        r#"
            SELECT * FROM outbox_messages
            WHERE processed = 0 AND dead = 0 AND next_attempt_at <= $1
            ORDER BY created_at ASC
            LIMIT $2;
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(messages)
}

pub async fn fetch_for_correlation(
    correlation_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxMessage>, sqlx::Error> {
    let messages = sqlx::query_as("SELECT * FROM outbox_messages WHERE correlation_id = $1 ORDER BY created_at ASC")
        .bind(correlation_id)
        .fetch_all(conn)
        .await?;
    Ok(messages)
}

/// Marks the record processed, exactly once. Re-marking an already processed record is a silent no-op, which is what
/// makes the relay's terminal paths idempotent.
pub async fn mark_processed(id: &OutboxId, conn: &mut SqliteConnection) -> Result<(), OrderStoreError> {
    let result = sqlx::query("UPDATE outbox_messages SET processed = 1, processed_at = $2 WHERE id = $1 AND processed = 0")
        .bind(id.as_str())
        .bind(Utc::now())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        warn!("🗃️ Outbox record {id} was already processed or does not exist. Nothing was changed.");
    }
    Ok(())
}

/// Records a failed processing attempt: bumps the attempt counter, schedules the next attempt per `policy`, and
/// flips the dead flag once the cap is reached.
pub async fn record_failure(
    id: &OutboxId,
    policy: &BackoffPolicy,
    conn: &mut SqliteConnection,
) -> Result<Option<OutboxMessage>, OrderStoreError> {
    let current: Option<OutboxMessage> =
        sqlx::query_as("SELECT * FROM outbox_messages WHERE id = $1").bind(id.as_str()).fetch_optional(&mut *conn).await?;
    let Some(current) = current else {
        return Ok(None);
    };
    let attempts = current.attempts + 1;
    let dead = policy.is_exhausted(attempts);
    let next_attempt_at = Utc::now() + policy.delay_after(attempts);
    let updated: OutboxMessage = sqlx::query_as(
        r#"
            UPDATE outbox_messages SET attempts = $2, next_attempt_at = $3, dead = $4
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id.as_str())
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(dead)
    .fetch_one(conn)
    .await?;
    Ok(Some(updated))
}
