use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPledge, Pledge, PledgeId, PledgeStatus},
    traits::PaymentGatewayError,
};

pub async fn insert(
    pledge: NewPledge,
    id: &PledgeId,
    conn: &mut SqliteConnection,
) -> Result<Pledge, PaymentGatewayError> {
    let pledge = sqlx::query_as(
        r#"
            INSERT INTO pledges (id, campaign_id, user_id, amount, currency, message, is_anonymous, donor_name,
                donor_email, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(pledge.campaign_id)
    .bind(pledge.user_id)
    .bind(pledge.amount)
    .bind(pledge.currency)
    .bind(pledge.message)
    .bind(pledge.is_anonymous)
    .bind(pledge.donor_name)
    .bind(pledge.donor_email)
    .fetch_one(conn)
    .await?;
    Ok(pledge)
}

pub async fn fetch(id: &PledgeId, conn: &mut SqliteConnection) -> Result<Option<Pledge>, PaymentGatewayError> {
    let pledge = sqlx::query_as(r#"SELECT * FROM pledges WHERE id = ?"#).bind(id).fetch_optional(conn).await?;
    Ok(pledge)
}

/// Compare-and-set status flip. Returns `None` when the pledge was not in `from` anymore.
pub async fn set_status_if(
    id: &PledgeId,
    from: PledgeStatus,
    to: PledgeStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Pledge>, PaymentGatewayError> {
    let pledge = sqlx::query_as(
        "UPDATE pledges SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(pledge)
}

/// Moves the pledge to a payment-driven outcome unless it is already settled there. The guard is
/// what makes event redelivery to the pledge projector a no-op: a terminal pledge stays put, with
/// the one exception that a completed pledge may still move to refunded.
pub async fn finalize_if_not_terminal(
    id: &PledgeId,
    to: PledgeStatus,
    payment_reference: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Pledge>, PaymentGatewayError> {
    let pledge = sqlx::query_as(
        r#"
            UPDATE pledges SET
                status = $1,
                payment_reference = COALESCE($2, payment_reference),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
              AND status NOT IN ('failed', 'refunded', 'cancelled')
              AND (status != 'completed' OR $1 = 'refunded')
            RETURNING *;
        "#,
    )
    .bind(to)
    .bind(payment_reference)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(pledge)
}
