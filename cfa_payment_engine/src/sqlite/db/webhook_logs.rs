use sqlx::SqliteConnection;

use crate::{db_types::WebhookLog, traits::PaymentGatewayError};

pub async fn seen(webhook_id: &str, conn: &mut SqliteConnection) -> Result<bool, PaymentGatewayError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_logs WHERE webhook_id = $1")
        .bind(webhook_id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

/// Insert-if-absent. Two deliveries racing on the same id both succeed here; the second one loses
/// the `seen` check it runs first, or the transition it attempts afterwards.
pub async fn insert_if_absent(
    webhook_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    let payload = payload.to_string();
    sqlx::query("INSERT OR IGNORE INTO webhook_logs (webhook_id, event_type, payload) VALUES ($1, $2, $3)")
        .bind(webhook_id)
        .bind(event_type)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_processed(webhook_id: &str, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE webhook_logs SET processed = 1, processed_at = CURRENT_TIMESTAMP WHERE webhook_id = $1")
        .bind(webhook_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Keeps the row unprocessed and stores the error. The delivery stays in the log for operators;
/// a later retry with a fresh webhook id gets its own row.
pub async fn record_error(webhook_id: &str, error: &str, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("UPDATE webhook_logs SET error_message = $1 WHERE webhook_id = $2")
        .bind(error)
        .bind(webhook_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch(webhook_id: &str, conn: &mut SqliteConnection) -> Result<Option<WebhookLog>, PaymentGatewayError> {
    let log = sqlx::query_as(r#"SELECT * FROM webhook_logs WHERE webhook_id = ?"#)
        .bind(webhook_id)
        .fetch_optional(conn)
        .await?;
    Ok(log)
}
