use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{db_types::IdempotencyRecord, traits::PaymentGatewayError};

pub async fn fetch_valid(
    key: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<IdempotencyRecord>, PaymentGatewayError> {
    let record = sqlx::query_as(r#"SELECT * FROM idempotency_keys WHERE idempotency_key = $1 AND expires_at > $2"#)
        .bind(key)
        .bind(now)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

/// Insert-if-absent. When two requests with the same key race past the lookup, both executed the
/// handler against the same request body and stored the same response, so letting the first
/// writer win is sound.
pub async fn insert_if_absent(record: IdempotencyRecord, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT OR IGNORE INTO idempotency_keys
                (idempotency_key, request_hash, response_body, response_status, expires_at)
            VALUES ($1, $2, $3, $4, $5);
        "#,
    )
    .bind(record.idempotency_key)
    .bind(record.request_hash)
    .bind(record.response_body)
    .bind(record.response_status)
    .bind(record.expires_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn purge_expired(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, PaymentGatewayError> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1").bind(now).execute(conn).await?;
    Ok(result.rows_affected())
}
