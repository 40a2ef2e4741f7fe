use cfa_common::Money;
use sqlx::SqliteConnection;

use crate::{
    db_types::{CampaignTotals, DonationRecord, PlatformStatistics, PledgeId, UserStatistics},
    traits::PaymentGatewayError,
};

/// Insert-if-absent, unsettled. The row is created when a pledge is announced and only counted
/// into the aggregates once settlement flips it.
pub async fn insert_donation(
    pledge_id: &PledgeId,
    campaign_id: &str,
    donor_id: Option<&str>,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        "INSERT OR IGNORE INTO donation_history (pledge_id, campaign_id, donor_id, amount) VALUES ($1, $2, $3, $4)",
    )
    .bind(pledge_id)
    .bind(campaign_id)
    .bind(donor_id)
    .bind(amount)
    .execute(conn)
    .await?;
    Ok(())
}

/// Flips the donation to settled. Returns `false` when there was nothing to flip, either because
/// the row is already settled (redelivery) or absent. The caller only applies the aggregate
/// increments on `true`, which is the exactly-once guard for the read models.
pub async fn settle_donation(pledge_id: &PledgeId, conn: &mut SqliteConnection) -> Result<bool, PaymentGatewayError> {
    let result = sqlx::query("UPDATE donation_history SET settled = 1 WHERE pledge_id = $1 AND settled = 0")
        .bind(pledge_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_unsettled_donation(
    pledge_id: &PledgeId,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query("DELETE FROM donation_history WHERE pledge_id = $1 AND settled = 0")
        .bind(pledge_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn incr_campaign_totals(
    campaign_id: &str,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO campaign_totals (campaign_id, raised_amount, donor_count, last_donation_at, updated_at)
            VALUES ($1, $2, 1, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT (campaign_id) DO UPDATE SET
                raised_amount = raised_amount + excluded.raised_amount,
                donor_count = donor_count + 1,
                last_donation_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(campaign_id)
    .bind(amount)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn incr_user_statistics(
    user_id: &str,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO user_statistics (user_id, total_donated, campaigns_supported, donation_count)
            VALUES ($1, $2, 1, 1)
            ON CONFLICT (user_id) DO UPDATE SET
                total_donated = total_donated + excluded.total_donated,
                donation_count = donation_count + 1,
                last_donation_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    // Derived from the settled history rather than incremented, so it stays correct when a donor
    // gives twice to the same campaign.
    sqlx::query(
        r#"
            UPDATE user_statistics SET campaigns_supported =
                (SELECT COUNT(DISTINCT campaign_id) FROM donation_history WHERE donor_id = $1 AND settled = 1)
            WHERE user_id = $1;
        "#,
    )
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn incr_platform_statistics(amount: Money, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            UPDATE platform_statistics SET
                total_raised = total_raised + $1,
                total_donations = total_donations + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = 1;
        "#,
    )
    .bind(amount)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_donation(
    pledge_id: &PledgeId,
    conn: &mut SqliteConnection,
) -> Result<Option<DonationRecord>, PaymentGatewayError> {
    let row = sqlx::query_as(r#"SELECT * FROM donation_history WHERE pledge_id = ?"#)
        .bind(pledge_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn fetch_campaign_totals(
    campaign_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<CampaignTotals>, PaymentGatewayError> {
    let row = sqlx::query_as(r#"SELECT * FROM campaign_totals WHERE campaign_id = ?"#)
        .bind(campaign_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn fetch_user_statistics(
    user_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<UserStatistics>, PaymentGatewayError> {
    let row = sqlx::query_as(r#"SELECT * FROM user_statistics WHERE user_id = ?"#)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn fetch_platform_statistics(
    conn: &mut SqliteConnection,
) -> Result<PlatformStatistics, PaymentGatewayError> {
    let row = sqlx::query_as(r#"SELECT * FROM platform_statistics WHERE id = 1"#).fetch_one(conn).await?;
    Ok(row)
}
