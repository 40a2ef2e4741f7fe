use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOutboxEvent, OutboxEvent},
    traits::PaymentGatewayError,
};

pub async fn insert(event: NewOutboxEvent, conn: &mut SqliteConnection) -> Result<i64, PaymentGatewayError> {
    let payload = event.payload.to_string();
    let id = sqlx::query(
        r#"
            INSERT INTO outbox (aggregate_id, aggregate_type, event_type, payload)
            VALUES ($1, $2, $3, $4);
        "#,
    )
    .bind(event.aggregate_id)
    .bind(event.aggregate_type)
    .bind(event.event_type)
    .bind(payload)
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Oldest-first batch of rows still worth publishing. Rows at or past the retry budget are
/// parked; they stay in the table for the audit trail but never come back from this query.
pub async fn fetch_unprocessed(
    batch_size: i64,
    max_retries: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxEvent>, PaymentGatewayError> {
    let rows = sqlx::query_as(
        r#"
            SELECT * FROM outbox
            WHERE processed = 0 AND retry_count < $1
            ORDER BY created_at, id
            LIMIT $2;
        "#,
    )
    .bind(max_retries)
    .bind(batch_size)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn mark_processed(id: i64, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE outbox SET processed = 1, processed_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn record_failure(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE outbox SET retry_count = retry_count + 1, last_error = $1 WHERE id = $2")
        .bind(error)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn count_parked(max_retries: i64, conn: &mut SqliteConnection) -> Result<i64, PaymentGatewayError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE processed = 0 AND retry_count >= $1")
        .bind(max_retries)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

pub async fn fetch_for_aggregate(
    aggregate_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<OutboxEvent>, PaymentGatewayError> {
    let rows = sqlx::query_as(r#"SELECT * FROM outbox WHERE aggregate_id = ? ORDER BY id"#)
        .bind(aggregate_id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}
