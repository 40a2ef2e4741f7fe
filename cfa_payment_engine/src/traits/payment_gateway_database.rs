use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{
    IdempotencyRecord,
    NewOutboxEvent,
    OutboxEvent,
    Payment,
    PaymentId,
    PaymentStatus,
    Pledge,
    PledgeId,
    PledgeStatus,
    TransitionExtra,
};

/// The storage backend for the payment reconciliation core.
///
/// This behaviour includes:
/// * The payment state machine's atomic transition (validate, update, history, outbox — one
///   transaction).
/// * Atomic payment initiation against a pending pledge.
/// * Webhook deduplication bookkeeping.
/// * Idempotency-record storage.
/// * Outbox bookkeeping for the relay.
/// * The projector-side writes (pledge aggregate, read models), each idempotent under redelivery.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    //----------------------------------- payments -------------------------------------------

    async fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, PaymentGatewayError>;

    async fn fetch_payment_by_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Payment>, PaymentGatewayError>;

    async fn fetch_payment_by_transaction_id(&self, transaction_id: &str)
        -> Result<Option<Payment>, PaymentGatewayError>;

    /// The atomic payment-initiation transaction of the initiation flow.
    ///
    /// In one transaction: verifies the pledge exists and is `pending` (else
    /// [`PaymentGatewayError::PledgeNotPending`]), verifies no payment exists for it yet (else
    /// [`PaymentGatewayError::PaymentAlreadyExists`]), creates the payment in `pending` with the
    /// given transaction id, flips the pledge to `payment_initiated`, and appends a
    /// `pledge.payment_initiated` outbox event.
    ///
    /// The gateway has NOT been called when this returns; the session call happens outside the
    /// transaction.
    async fn initiate_payment(&self, pledge_id: &PledgeId, transaction_id: &str)
        -> Result<Payment, PaymentGatewayError>;

    /// Best-effort persistence of the gateway session blob after initiation. Failure leaves the
    /// payment valid in `pending`; manual gateway validation can reconcile later.
    async fn update_gateway_response(
        &self,
        id: &PaymentId,
        response: &serde_json::Value,
    ) -> Result<(), PaymentGatewayError>;

    /// The state machine's transition function. In one transaction:
    /// 1. loads the payment (serialising against concurrent transitions),
    /// 2. validates `current → target` against the transition table, re-checking against the
    ///    stored row at write time (compare-and-set),
    /// 3. applies the field updates in `extra`,
    /// 4. appends a state-history row,
    /// 5. appends the canonical outbox event for `target`, plus a `payment.complete` event when
    ///    `target` ends the attempt.
    ///
    /// Fails with [`PaymentGatewayError::InvalidStateTransition`] without mutating anything when
    /// the transition is not legal, including when a concurrent caller won the race.
    async fn transition_payment(
        &self,
        id: &PaymentId,
        target: PaymentStatus,
        extra: TransitionExtra,
        reason: Option<&str>,
    ) -> Result<Payment, PaymentGatewayError>;

    //----------------------------------- pledges --------------------------------------------

    async fn fetch_pledge(&self, id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError>;

    /// Marks the pledge completed and appends a `pledge.completed` outbox event, in one
    /// transaction. The update is guarded on the pledge not already being terminal, so redelivery
    /// of the triggering event is a no-op and returns `None`.
    async fn complete_pledge(
        &self,
        id: &PledgeId,
        payment_reference: &str,
    ) -> Result<Option<Pledge>, PaymentGatewayError>;

    /// Mirrors a terminal payment outcome onto the pledge (`failed` or `refunded`). Guarded like
    /// [`Self::complete_pledge`]; returns `None` when the pledge was already terminal.
    async fn finalize_pledge(
        &self,
        id: &PledgeId,
        status: PledgeStatus,
        payment_reference: Option<&str>,
    ) -> Result<Option<Pledge>, PaymentGatewayError>;

    //----------------------------------- webhooks -------------------------------------------

    /// True if this physical webhook delivery has been seen before.
    async fn webhook_seen(&self, webhook_id: &str) -> Result<bool, PaymentGatewayError>;

    /// Records a webhook delivery as received-but-unprocessed. Idempotent (insert-if-absent).
    async fn record_webhook(
        &self,
        webhook_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PaymentGatewayError>;

    async fn mark_webhook_processed(&self, webhook_id: &str) -> Result<(), PaymentGatewayError>;

    /// Stores the error on the webhook log row, leaving it unprocessed for the audit trail.
    async fn record_webhook_error(&self, webhook_id: &str, error: &str) -> Result<(), PaymentGatewayError>;

    //----------------------------------- idempotency ----------------------------------------

    /// Fetches the idempotency record for `key` if one exists and has not expired at `now`.
    async fn fetch_idempotency_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, PaymentGatewayError>;

    /// Stores a response against an idempotency key. Insert-if-absent; a concurrent writer
    /// winning the race is fine, since both stored the same handler response.
    async fn store_idempotency_record(&self, record: IdempotencyRecord) -> Result<(), PaymentGatewayError>;

    //----------------------------------- outbox ---------------------------------------------

    /// Appends an event to the outbox outside of any other transaction. The transactional
    /// appends happen inside [`Self::transition_payment`] and friends; this exists for callers
    /// that own no other state (e.g. test seeding, pledge-service style writers).
    async fn append_outbox_event(&self, event: NewOutboxEvent) -> Result<(), PaymentGatewayError>;

    /// Oldest-first batch of unprocessed outbox rows still under the retry budget.
    async fn fetch_unprocessed_outbox(
        &self,
        batch_size: i64,
        max_retries: i64,
    ) -> Result<Vec<OutboxEvent>, PaymentGatewayError>;

    async fn mark_outbox_processed(&self, id: i64) -> Result<(), PaymentGatewayError>;

    /// Bumps the retry counter and records the publish error, leaving the row eligible for the
    /// next poll (until the retry budget runs out and it is parked).
    async fn record_outbox_failure(&self, id: i64, error: &str) -> Result<(), PaymentGatewayError>;

    /// Number of rows parked after exhausting the retry budget. Surfaced by the relay for
    /// operator attention; nothing moves these automatically.
    async fn count_parked_outbox(&self, max_retries: i64) -> Result<i64, PaymentGatewayError>;

    //----------------------------------- read models ----------------------------------------

    /// Insert-if-absent into the donation history (unsettled). Keyed by pledge id.
    async fn record_donation(
        &self,
        pledge_id: &PledgeId,
        campaign_id: &str,
        donor_id: Option<&str>,
        amount: cfa_common::Money,
    ) -> Result<(), PaymentGatewayError>;

    /// Settles a donation and increments the campaign/user/platform aggregates, in one
    /// transaction. Returns `false` (and increments nothing) when the donation was already
    /// settled, which is what makes redelivery of `pledge.completed` safe.
    async fn settle_donation(
        &self,
        pledge_id: &PledgeId,
        campaign_id: &str,
        donor_id: Option<&str>,
        amount: cfa_common::Money,
    ) -> Result<bool, PaymentGatewayError>;

    /// Removes an unsettled donation-history row (pledge cancelled before payment).
    async fn remove_donation(&self, pledge_id: &PledgeId) -> Result<(), PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested payment does not exist: {0}")]
    PaymentNotFound(String),
    #[error("The requested pledge does not exist: {0}")]
    PledgeNotFound(PledgeId),
    #[error("Pledge {pledge_id} is not in pending state (current: {status})")]
    PledgeNotPending { pledge_id: PledgeId, status: PledgeStatus },
    #[error("A payment has already been initiated for pledge {0}")]
    PaymentAlreadyExists(PledgeId),
    #[error("Invalid state transition for payment {payment_id}: {from} -> {to}")]
    InvalidStateTransition { payment_id: PaymentId, from: PaymentStatus, to: PaymentStatus },
    #[error("Idempotency key '{0}' has already been used with a different request body")]
    IdempotencyKeyConflict(String),
    #[error("Payment {0} has no transaction id recorded")]
    NoTransactionId(PaymentId),
    #[error("Payment {0} has no bank transaction reference; cannot refund")]
    NoBankTransactionId(PaymentId),
    #[error("Only completed payments can be refunded; payment {payment_id} is {status}")]
    RefundNotAllowed { payment_id: PaymentId, status: PaymentStatus },
    #[error("Payment gateway error: {0}")]
    GatewayError(String),
    #[error("Webhook payload was rejected: {0}")]
    WebhookRejected(String),
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentGatewayError {
    fn from(e: serde_json::Error) -> Self {
        PaymentGatewayError::DatabaseError(format!("Payload serialization error: {e}"))
    }
}
