use sqlx::SqliteConnection;

use crate::{
    db_types::{Payment, PaymentId, PaymentStatus, Pledge, StateTransition, TransitionExtra},
    traits::PaymentGatewayError,
};

/// Creates the payment row for a pledge, in `pending`. The unique index on `pledge_id` turns a
/// concurrent double-initiation into [`PaymentGatewayError::PaymentAlreadyExists`].
pub async fn insert(
    pledge: &Pledge,
    id: &PaymentId,
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Payment, PaymentGatewayError> {
    let payment = sqlx::query_as(
        r#"
            INSERT INTO payments (id, pledge_id, transaction_id, amount, currency, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(&pledge.id)
    .bind(transaction_id)
    .bind(pledge.amount)
    .bind(&pledge.currency)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            PaymentGatewayError::PaymentAlreadyExists(pledge.id.clone())
        },
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(payment)
}

pub async fn fetch(id: &PaymentId, conn: &mut SqliteConnection) -> Result<Option<Payment>, PaymentGatewayError> {
    let payment = sqlx::query_as(r#"SELECT * FROM payments WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_by_pledge(
    pledge_id: &crate::db_types::PledgeId,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, PaymentGatewayError> {
    let payment =
        sqlx::query_as(r#"SELECT * FROM payments WHERE pledge_id = ?"#).bind(pledge_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_by_transaction_id(
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, PaymentGatewayError> {
    let payment = sqlx::query_as(r#"SELECT * FROM payments WHERE transaction_id = ?"#)
        .bind(transaction_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn update_gateway_response(
    id: &PaymentId,
    response: &serde_json::Value,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    let blob = response.to_string();
    sqlx::query("UPDATE payments SET gateway_response = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(blob)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// The compare-and-set half of the transition. The `status = $from` predicate re-checks the
/// precondition at write time, so a concurrent transition that committed first makes this return
/// `None` instead of silently overwriting.
pub async fn transition_if(
    id: &PaymentId,
    from: PaymentStatus,
    to: PaymentStatus,
    extra: &TransitionExtra,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, PaymentGatewayError> {
    let gateway_response = extra.gateway_response.as_ref().map(|v| v.to_string());
    let payment = sqlx::query_as(
        r#"
            UPDATE payments SET
                status = $1,
                payment_method = COALESCE($2, payment_method),
                gateway_response = COALESCE($3, gateway_response),
                error_message = COALESCE($4, error_message),
                refund_reason = COALESCE($5, refund_reason),
                refunded_at = CASE WHEN $6 THEN CURRENT_TIMESTAMP ELSE refunded_at END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $7 AND status = $8
            RETURNING *;
        "#,
    )
    .bind(to)
    .bind(&extra.payment_method)
    .bind(gateway_response)
    .bind(&extra.error_message)
    .bind(&extra.refund_reason)
    .bind(to == PaymentStatus::Refunded)
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn insert_history(
    id: &PaymentId,
    from: PaymentStatus,
    to: PaymentStatus,
    reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query("INSERT INTO payment_state_history (payment_id, from_status, to_status, reason) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(reason)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_history(
    id: &PaymentId,
    conn: &mut SqliteConnection,
) -> Result<Vec<StateTransition>, PaymentGatewayError> {
    let rows = sqlx::query_as(r#"SELECT * FROM payment_state_history WHERE payment_id = ? ORDER BY id"#)
        .bind(id)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}
