//! `SqliteDatabase` is a concrete implementation of a payment reconciliation backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the [`crate::traits`] seams.
//!
//! A note on locking: SQLite has no `SELECT ... FOR UPDATE`. Write transactions are serialised by
//! the engine itself, so the transition transaction below gets its race safety from the
//! compare-and-set `UPDATE ... WHERE status = ?` inside the transaction rather than from row
//! locks. A concurrent transition that committed first makes the CAS miss, and the whole
//! transaction rolls back with `InvalidStateTransition`.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, idempotency, new_pool, outbox, payments, pledges, read_models, webhook_logs};
use crate::{
    db_types::{
        CampaignTotals,
        DonationRecord,
        IdempotencyRecord,
        NewOutboxEvent,
        NewPledge,
        OutboxEvent,
        Payment,
        PaymentId,
        PaymentStatus,
        PlatformStatistics,
        Pledge,
        PledgeId,
        PledgeStatus,
        StateTransition,
        TransitionExtra,
        UserStatistics,
        WebhookLog,
    },
    events::event_types::{self, PaymentEventPayload, PaymentInitiatedPayload, PledgeEventPayload},
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
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

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch(id, &mut conn).await
    }

    async fn fetch_payment_by_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_by_pledge(pledge_id, &mut conn).await
    }

    async fn fetch_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_by_transaction_id(transaction_id, &mut conn).await
    }

    /// Takes a pledge id and a freshly minted transaction id and, in a single atomic transaction,
    /// * verifies the pledge exists and is still `pending`,
    /// * creates the payment row in `pending`,
    /// * flips the pledge to `payment_initiated`,
    /// * appends a `pledge.payment_initiated` outbox event.
    ///
    /// The gateway has not been contacted when this commits. If the process dies right here, the
    /// committed rows describe exactly what happened: a payment attempt exists and no session was
    /// opened.
    async fn initiate_payment(
        &self,
        pledge_id: &PledgeId,
        transaction_id: &str,
    ) -> Result<Payment, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let pledge = pledges::fetch(pledge_id, &mut tx)
            .await?
            .ok_or_else(|| PaymentGatewayError::PledgeNotFound(pledge_id.clone()))?;
        if pledge.status != PledgeStatus::Pending {
            return Err(PaymentGatewayError::PledgeNotPending { pledge_id: pledge_id.clone(), status: pledge.status });
        }
        if payments::fetch_by_pledge(pledge_id, &mut tx).await?.is_some() {
            return Err(PaymentGatewayError::PaymentAlreadyExists(pledge_id.clone()));
        }
        let payment_id = PaymentId::random();
        let payment = payments::insert(&pledge, &payment_id, transaction_id, &mut tx).await?;
        let flipped =
            pledges::set_status_if(pledge_id, PledgeStatus::Pending, PledgeStatus::PaymentInitiated, &mut tx).await?;
        if flipped.is_none() {
            // A concurrent initiation slipped between our read and this write. Roll everything back.
            return Err(PaymentGatewayError::PaymentAlreadyExists(pledge_id.clone()));
        }
        let payload = serde_json::to_value(PaymentInitiatedPayload {
            pledge_id: pledge_id.to_string(),
            payment_id: payment.id.to_string(),
            transaction_id: transaction_id.to_string(),
            amount: payment.amount,
        })?;
        outbox::insert(
            NewOutboxEvent::pledge(pledge_id, event_types::PLEDGE_PAYMENT_INITIATED, payload),
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        debug!("🗃️ Payment {payment_id} created for pledge {pledge_id} with txid {transaction_id}");
        Ok(payment)
    }

    async fn update_gateway_response(
        &self,
        id: &PaymentId,
        response: &serde_json::Value,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::update_gateway_response(id, response, &mut conn).await
    }

    /// The state machine's single write path. Everything below happens in one transaction; a
    /// failure at any step leaves no trace.
    async fn transition_payment(
        &self,
        id: &PaymentId,
        target: PaymentStatus,
        extra: TransitionExtra,
        reason: Option<&str>,
    ) -> Result<Payment, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let payment =
            payments::fetch(id, &mut tx).await?.ok_or_else(|| PaymentGatewayError::PaymentNotFound(id.to_string()))?;
        let from = payment.status;
        if !from.can_transition_to(target) {
            return Err(PaymentGatewayError::InvalidStateTransition { payment_id: id.clone(), from, to: target });
        }
        let payment = payments::transition_if(id, from, target, &extra, &mut tx).await?.ok_or(
            // The CAS missed: somebody else transitioned the row since our read.
            PaymentGatewayError::InvalidStateTransition { payment_id: id.clone(), from, to: target },
        )?;
        payments::insert_history(id, from, target, reason, &mut tx).await?;
        let payload = serde_json::to_value(PaymentEventPayload::from(&payment))?;
        // `pending` is never a transition target, so there is always a canonical event here.
        if let Some(canonical) = event_types::canonical_event_for(target) {
            outbox::insert(NewOutboxEvent::payment(id, canonical, payload.clone()), &mut tx).await?;
        }
        if target.ends_attempt() {
            // The legacy "attempt is over" signal, emitted alongside the canonical event for
            // consumers that only care whether the attempt is still live.
            outbox::insert(NewOutboxEvent::payment(id, event_types::PAYMENT_COMPLETE, payload), &mut tx).await?;
        }
        tx.commit().await?;
        info!("🗃️ Payment {id} transitioned {from} -> {target}");
        Ok(payment)
    }

    async fn fetch_pledge(&self, id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        pledges::fetch(id, &mut conn).await
    }

    async fn complete_pledge(
        &self,
        id: &PledgeId,
        payment_reference: &str,
    ) -> Result<Option<Pledge>, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let Some(pledge) =
            pledges::finalize_if_not_terminal(id, PledgeStatus::Completed, Some(payment_reference), &mut tx).await?
        else {
            // Already settled; redelivery of the triggering event.
            return Ok(None);
        };
        let payload = serde_json::to_value(PledgeEventPayload::from(&pledge))?;
        outbox::insert(NewOutboxEvent::pledge(id, event_types::PLEDGE_COMPLETED, payload), &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Pledge {id} completed (payment {payment_reference})");
        Ok(Some(pledge))
    }

    async fn finalize_pledge(
        &self,
        id: &PledgeId,
        status: PledgeStatus,
        payment_reference: Option<&str>,
    ) -> Result<Option<Pledge>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let pledge = pledges::finalize_if_not_terminal(id, status, payment_reference, &mut conn).await?;
        if pledge.is_some() {
            info!("🗃️ Pledge {id} finalized as {status}");
        }
        Ok(pledge)
    }

    async fn webhook_seen(&self, webhook_id: &str) -> Result<bool, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_logs::seen(webhook_id, &mut conn).await
    }

    async fn record_webhook(
        &self,
        webhook_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_logs::insert_if_absent(webhook_id, event_type, payload, &mut conn).await
    }

    async fn mark_webhook_processed(&self, webhook_id: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_logs::mark_processed(webhook_id, &mut conn).await
    }

    async fn record_webhook_error(&self, webhook_id: &str, error: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_logs::record_error(webhook_id, error, &mut conn).await
    }

    async fn fetch_idempotency_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::fetch_valid(key, now, &mut conn).await
    }

    async fn store_idempotency_record(&self, record: IdempotencyRecord) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::insert_if_absent(record, &mut conn).await
    }

    async fn append_outbox_event(&self, event: NewOutboxEvent) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::insert(event, &mut conn).await?;
        Ok(())
    }

    async fn fetch_unprocessed_outbox(
        &self,
        batch_size: i64,
        max_retries: i64,
    ) -> Result<Vec<OutboxEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::fetch_unprocessed(batch_size, max_retries, &mut conn).await
    }

    async fn mark_outbox_processed(&self, id: i64) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::mark_processed(id, &mut conn).await
    }

    async fn record_outbox_failure(&self, id: i64, error: &str) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::record_failure(id, error, &mut conn).await
    }

    async fn count_parked_outbox(&self, max_retries: i64) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::count_parked(max_retries, &mut conn).await
    }

    async fn record_donation(
        &self,
        pledge_id: &PledgeId,
        campaign_id: &str,
        donor_id: Option<&str>,
        amount: cfa_common::Money,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::insert_donation(pledge_id, campaign_id, donor_id, amount, &mut conn).await
    }

    /// Settles the donation and applies the aggregate increments, all in one transaction. The
    /// settle flip is the guard: when it reports nothing changed, no increment runs and the
    /// redelivered event is absorbed.
    async fn settle_donation(
        &self,
        pledge_id: &PledgeId,
        campaign_id: &str,
        donor_id: Option<&str>,
        amount: cfa_common::Money,
    ) -> Result<bool, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        read_models::insert_donation(pledge_id, campaign_id, donor_id, amount, &mut tx).await?;
        if !read_models::settle_donation(pledge_id, &mut tx).await? {
            debug!("🗃️ Donation for pledge {pledge_id} was already settled. Skipping increments");
            return Ok(false);
        }
        read_models::incr_campaign_totals(campaign_id, amount, &mut tx).await?;
        if let Some(user_id) = donor_id {
            read_models::incr_user_statistics(user_id, amount, &mut tx).await?;
        }
        read_models::incr_platform_statistics(amount, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Donation for pledge {pledge_id} settled into the read models");
        Ok(true)
    }

    async fn remove_donation(&self, pledge_id: &PledgeId) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::remove_unsettled_donation(pledge_id, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates a pledge directly. The pledge aggregate is normally owned by the pledge service;
    /// this exists for the pledge-service side of the deployment and for seeding.
    pub async fn insert_pledge(&self, pledge: NewPledge) -> Result<Pledge, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let id = PledgeId::random();
        let pledge = pledges::insert(pledge, &id, &mut tx).await?;
        let payload = serde_json::to_value(PledgeEventPayload::from(&pledge))?;
        outbox::insert(NewOutboxEvent::pledge(&id, event_types::PLEDGE_CREATED, payload), &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Pledge {id} created for campaign {}", pledge.campaign_id);
        Ok(pledge)
    }

    pub async fn fetch_payment_history(&self, id: &PaymentId) -> Result<Vec<StateTransition>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_history(id, &mut conn).await
    }

    pub async fn fetch_outbox_for_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        outbox::fetch_for_aggregate(aggregate_id, &mut conn).await
    }

    pub async fn fetch_webhook_log(&self, webhook_id: &str) -> Result<Option<WebhookLog>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_logs::fetch(webhook_id, &mut conn).await
    }

    pub async fn fetch_donation(&self, pledge_id: &PledgeId) -> Result<Option<DonationRecord>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::fetch_donation(pledge_id, &mut conn).await
    }

    pub async fn fetch_campaign_totals(&self, campaign_id: &str) -> Result<Option<CampaignTotals>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::fetch_campaign_totals(campaign_id, &mut conn).await
    }

    pub async fn fetch_user_statistics(&self, user_id: &str) -> Result<Option<UserStatistics>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::fetch_user_statistics(user_id, &mut conn).await
    }

    pub async fn fetch_platform_statistics(&self) -> Result<PlatformStatistics, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        read_models::fetch_platform_statistics(&mut conn).await
    }

    /// Removes idempotency records that have passed their TTL.
    pub async fn purge_expired_idempotency_keys(&self) -> Result<u64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::purge_expired(Utc::now(), &mut conn).await
    }
}
