use std::time::Duration;

use log::*;
use serde::Deserialize;

use crate::{
    db_types::{Payment, PaymentStatus, TransitionExtra},
    helpers::WebhookChannel,
    traits::{PaymentGatewayClient, PaymentGatewayDatabase, PaymentGatewayError},
};

const DEFAULT_IPN_VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// IPN statuses the gateway uses for attempts that will never succeed. These arrive without a
/// validation id, so the reported status is all there is to go on.
const IPN_FAILURE_STATUSES: [&str; 2] = ["FAILED", "CANCELLED"];

/// The fields we care about from a gateway callback, in any of the four channels. The full raw
/// body travels alongside for the webhook log and the payment's gateway-response blob.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackData {
    pub transaction_id: String,
    pub val_id: Option<String>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub raw: serde_json::Value,
}

impl CallbackData {
    pub fn new(transaction_id: impl Into<String>, raw: serde_json::Value) -> Self {
        Self { transaction_id: transaction_id.into(), val_id: None, payment_method: None, status: None, error: None, raw }
    }
}

/// What happened to a webhook delivery. Only `Rejected` is an abnormal outcome; the others are
/// all business as usual under at-least-once delivery.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// The delivery advanced the state machine.
    Applied(Payment),
    /// This exact delivery was seen before; nothing was done.
    Duplicate,
    /// The delivery arrived too late or out of order; the state machine refused the transition
    /// and the delivery was absorbed.
    OutOfOrder(String),
    /// The delivery could not be tied to a payment, or failed validation.
    Rejected(String),
}

impl WebhookOutcome {
    pub fn message(&self) -> String {
        match self {
            WebhookOutcome::Applied(p) => format!("Payment {} is now {}", p.transaction_id, p.status),
            WebhookOutcome::Duplicate => "Duplicate webhook ignored".to_string(),
            WebhookOutcome::OutOfOrder(msg) => msg.clone(),
            WebhookOutcome::Rejected(msg) => msg.clone(),
        }
    }
}

/// Normalises the four inbound gateway channels into state machine transitions.
///
/// Channels overlap (a successful payment produces both a `success` redirect and an `ipn`
/// delivery, in no particular order) and retry, so every path through here must tolerate
/// duplication and interleaving. The webhook log absorbs exact duplicates cheaply; the transition
/// table is the actual correctness guarantee.
pub struct WebhookApi<B, G> {
    db: B,
    gateway: G,
    validate_timeout: Duration,
}

impl<B, G> WebhookApi<B, G>
where
    B: PaymentGatewayDatabase,
    G: PaymentGatewayClient,
{
    pub fn new(db: B, gateway: G) -> Self {
        Self { db, gateway, validate_timeout: DEFAULT_IPN_VALIDATION_TIMEOUT }
    }

    /// How long an IPN validation round-trip to the gateway may take before the delivery is
    /// treated as a gateway error (and so retried by the gateway later).
    pub fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    /// Success redirect: the donor's browser came back happy. Browser-driven, so it proves
    /// nothing about the money; it moves `pending` to `authorized` (and `authorized` to
    /// `captured` when the IPN beat it to authorization).
    pub async fn process_success(&self, data: CallbackData) -> Result<WebhookOutcome, PaymentGatewayError> {
        let webhook_id = WebhookChannel::Success.webhook_id(&data.transaction_id, data.val_id.as_deref());
        let Some(outcome) = self.record_delivery(&webhook_id, WebhookChannel::Success, &data).await? else {
            return Ok(WebhookOutcome::Duplicate);
        };
        let payment = match outcome {
            Some(payment) => payment,
            None => return self.reject(&webhook_id, &data.transaction_id).await,
        };
        let target = match payment.status {
            PaymentStatus::Pending => PaymentStatus::Authorized,
            PaymentStatus::Authorized => PaymentStatus::Captured,
            other => {
                return self.absorb_out_of_order(&webhook_id, &payment, other, PaymentStatus::Authorized).await;
            },
        };
        let extra = TransitionExtra {
            payment_method: data.payment_method.clone(),
            gateway_response: Some(data.raw.clone()),
            ..Default::default()
        };
        self.apply(&webhook_id, &payment, target, extra, "success webhook").await
    }

    /// Fail redirect: the gateway told the donor's browser the attempt failed.
    pub async fn process_fail(&self, data: CallbackData) -> Result<WebhookOutcome, PaymentGatewayError> {
        self.process_terminal_failure(WebhookChannel::Fail, data, "fail webhook").await
    }

    /// Cancel redirect: the donor backed out at the gateway. Recorded on its own channel for the
    /// audit trail, but it collapses onto `failed` in the state machine.
    pub async fn process_cancel(&self, data: CallbackData) -> Result<WebhookOutcome, PaymentGatewayError> {
        self.process_terminal_failure(WebhookChannel::Cancel, data, "cancel webhook").await
    }

    /// IPN: the gateway's server-to-server notification, the only channel we trust to say the
    /// money actually moved. The carried validation id is checked back with the gateway before
    /// anything happens; a valid IPN then walks the payment down the happy path to `completed`,
    /// however far along it already was.
    pub async fn process_ipn(&self, data: CallbackData) -> Result<WebhookOutcome, PaymentGatewayError> {
        let webhook_id = WebhookChannel::Ipn.webhook_id(&data.transaction_id, data.val_id.as_deref());
        let Some(outcome) = self.record_delivery(&webhook_id, WebhookChannel::Ipn, &data).await? else {
            return Ok(WebhookOutcome::Duplicate);
        };
        let payment = match outcome {
            Some(payment) => payment,
            None => return self.reject(&webhook_id, &data.transaction_id).await,
        };
        if data.status.as_deref().is_some_and(|s| IPN_FAILURE_STATUSES.contains(&s)) {
            let extra = TransitionExtra {
                error_message: data
                    .error
                    .clone()
                    .or_else(|| data.status.as_ref().map(|s| format!("Gateway reported status {s}"))),
                gateway_response: Some(data.raw.clone()),
                ..Default::default()
            };
            return self.apply_failure(&webhook_id, &payment, extra, "ipn reported failure").await;
        }
        let Some(val_id) = data.val_id.as_deref() else {
            let msg = format!("IPN for {} carried no validation id", data.transaction_id);
            warn!("📨️ {msg}");
            self.db.record_webhook_error(&webhook_id, &msg).await?;
            return Ok(WebhookOutcome::Rejected(msg));
        };
        let validation = tokio::time::timeout(self.validate_timeout, self.gateway.validate_transaction(val_id))
            .await
            .map_err(|_| PaymentGatewayError::GatewayError("IPN validation timed out".to_string()))?
            .map_err(|e| PaymentGatewayError::GatewayError(e.to_string()))?;
        if !validation.is_valid() {
            // A success-shaped IPN the gateway disowns is forged or stale. Nobody gets to move
            // the state machine on the strength of an unvalidated delivery; log it and walk away.
            let msg = format!(
                "IPN validation failed for {}: gateway says {}",
                data.transaction_id, validation.status
            );
            error!("📨️ {msg}");
            self.db.record_webhook_error(&webhook_id, &msg).await?;
            return Ok(WebhookOutcome::Rejected(msg));
        }
        self.drive_to_completed(&webhook_id, payment, data, validation.raw).await
    }

    //----------------------------------- shared plumbing ------------------------------------

    /// Records the delivery in the webhook log and loads the payment it refers to. Returns
    /// `None` when the delivery is an exact duplicate, `Some(None)` when no payment matches.
    async fn record_delivery(
        &self,
        webhook_id: &str,
        channel: WebhookChannel,
        data: &CallbackData,
    ) -> Result<Option<Option<Payment>>, PaymentGatewayError> {
        if self.db.webhook_seen(webhook_id).await? {
            debug!("📨️ Duplicate {channel} webhook {webhook_id}");
            return Ok(None);
        }
        self.db.record_webhook(webhook_id, &channel.to_string(), &data.raw).await?;
        let payment = self.db.fetch_payment_by_transaction_id(&data.transaction_id).await?;
        Ok(Some(payment))
    }

    async fn process_terminal_failure(
        &self,
        channel: WebhookChannel,
        data: CallbackData,
        reason: &str,
    ) -> Result<WebhookOutcome, PaymentGatewayError> {
        let webhook_id = channel.webhook_id(&data.transaction_id, data.val_id.as_deref());
        let Some(outcome) = self.record_delivery(&webhook_id, channel, &data).await? else {
            return Ok(WebhookOutcome::Duplicate);
        };
        let payment = match outcome {
            Some(payment) => payment,
            None => return self.reject(&webhook_id, &data.transaction_id).await,
        };
        let error_message = data
            .error
            .clone()
            .or_else(|| data.status.as_ref().map(|s| format!("Gateway reported status {s}")))
            .unwrap_or_else(|| format!("Payment attempt ended on the {channel} channel"));
        let extra = TransitionExtra {
            error_message: Some(error_message),
            gateway_response: Some(data.raw.clone()),
            ..Default::default()
        };
        self.apply_failure(&webhook_id, &payment, extra, reason).await
    }

    /// A valid IPN means the money moved, whatever intermediate states we observed. Walk the
    /// happy path one legal step at a time so each hop lands in the history and the outbox.
    async fn drive_to_completed(
        &self,
        webhook_id: &str,
        mut payment: Payment,
        data: CallbackData,
        validation_raw: serde_json::Value,
    ) -> Result<WebhookOutcome, PaymentGatewayError> {
        if payment.status.ends_attempt() {
            return self.absorb_out_of_order(webhook_id, &payment, payment.status, PaymentStatus::Completed).await;
        }
        let mut extra = TransitionExtra {
            payment_method: data.payment_method.clone(),
            gateway_response: Some(validation_raw),
            ..Default::default()
        };
        while let Some(next) = payment.status.next_towards_completed() {
            payment = match self.db.transition_payment(&payment.id, next, extra, Some("ipn validated")).await {
                Ok(payment) => payment,
                Err(PaymentGatewayError::InvalidStateTransition { from, to, .. }) => {
                    // Lost a race against another channel. Re-read and carry on from wherever
                    // the winner left the payment.
                    debug!("📨️ IPN walk for {} lost a race ({from} -> {to}), re-reading", payment.id);
                    extra = TransitionExtra::default();
                    match self.db.fetch_payment(&payment.id).await? {
                        Some(p) if !p.status.ends_attempt() => {
                            payment = p;
                            continue;
                        },
                        Some(p) => {
                            return self
                                .absorb_out_of_order(webhook_id, &p, p.status, PaymentStatus::Completed)
                                .await;
                        },
                        None => return Err(PaymentGatewayError::PaymentNotFound(payment.id.to_string())),
                    }
                },
                Err(e) => return Err(e),
            };
            extra = TransitionExtra::default();
        }
        self.db.mark_webhook_processed(webhook_id).await?;
        info!("📨️ IPN drove payment {} to {}", payment.id, payment.status);
        Ok(WebhookOutcome::Applied(payment))
    }

    async fn apply(
        &self,
        webhook_id: &str,
        payment: &Payment,
        target: PaymentStatus,
        extra: TransitionExtra,
        reason: &str,
    ) -> Result<WebhookOutcome, PaymentGatewayError> {
        match self.db.transition_payment(&payment.id, target, extra, Some(reason)).await {
            Ok(payment) => {
                self.db.mark_webhook_processed(webhook_id).await?;
                Ok(WebhookOutcome::Applied(payment))
            },
            Err(PaymentGatewayError::InvalidStateTransition { from, to, .. }) => {
                self.absorb_out_of_order(webhook_id, payment, from, to).await
            },
            Err(e) => {
                self.db.record_webhook_error(webhook_id, &e.to_string()).await?;
                Err(e)
            },
        }
    }

    async fn apply_failure(
        &self,
        webhook_id: &str,
        payment: &Payment,
        extra: TransitionExtra,
        reason: &str,
    ) -> Result<WebhookOutcome, PaymentGatewayError> {
        if payment.status.ends_attempt() {
            return self.absorb_out_of_order(webhook_id, payment, payment.status, PaymentStatus::Failed).await;
        }
        self.apply(webhook_id, payment, PaymentStatus::Failed, extra, reason).await
    }

    async fn absorb_out_of_order(
        &self,
        webhook_id: &str,
        payment: &Payment,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<WebhookOutcome, PaymentGatewayError> {
        let msg = format!("Webhook for payment {} arrived out of order ({from} -> {to}); no action taken", payment.id);
        warn!("📨️ {msg}");
        // The delivery was handled, even though it changed nothing.
        self.db.mark_webhook_processed(webhook_id).await?;
        Ok(WebhookOutcome::OutOfOrder(msg))
    }

    async fn reject(&self, webhook_id: &str, transaction_id: &str) -> Result<WebhookOutcome, PaymentGatewayError> {
        let msg = format!("No payment found for transaction {transaction_id}");
        warn!("📨️ {msg}");
        self.db.record_webhook_error(webhook_id, &msg).await?;
        Ok(WebhookOutcome::Rejected(msg))
    }
}
