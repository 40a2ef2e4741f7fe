use log::*;
use serde::Serialize;

use crate::{
    db_types::{Payment, PaymentId, PaymentStatus, Pledge, PledgeId, TransitionExtra},
    helpers::new_transaction_id,
    traits::{
        GatewaySessionRequest,
        GatewayValidation,
        PaymentGatewayClient,
        PaymentGatewayDatabase,
        PaymentGatewayError,
    },
};

/// Where the gateway sends the donor's browser (and its server-to-server IPN) after checkout.
#[derive(Debug, Clone)]
pub struct RedirectUrls {
    pub success_url: String,
    pub fail_url: String,
    pub cancel_url: String,
    pub ipn_url: String,
}

impl RedirectUrls {
    /// The conventional layout: all four callbacks live under `{base}/payments/webhook/`.
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            success_url: format!("{base}/payments/webhook/success"),
            fail_url: format!("{base}/payments/webhook/fail"),
            cancel_url: format!("{base}/payments/webhook/cancel"),
            ipn_url: format!("{base}/payments/webhook/ipn"),
        }
    }

    /// Per-request overrides for the browser-facing redirect targets. The IPN callback is not
    /// overridable; it always points back at this server.
    pub fn with_overrides(
        &self,
        success: Option<String>,
        fail: Option<String>,
        cancel: Option<String>,
    ) -> Self {
        Self {
            success_url: success.unwrap_or_else(|| self.success_url.clone()),
            fail_url: fail.unwrap_or_else(|| self.fail_url.clone()),
            cancel_url: cancel.unwrap_or_else(|| self.cancel_url.clone()),
            ipn_url: self.ipn_url.clone(),
        }
    }
}

/// The result of a successful initiation: the committed payment row plus the gateway session the
/// caller redirects the donor to.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitiation {
    pub payment: Payment,
    pub gateway_url: String,
    pub session_key: String,
}

/// Client-initiated payment operations: initiation, refunds, manual gateway reconciliation, and
/// the raw transition function for operators.
pub struct PaymentFlowApi<B, G> {
    db: B,
    gateway: G,
}

impl<B, G> PaymentFlowApi<B, G>
where
    B: PaymentGatewayDatabase,
    G: PaymentGatewayClient,
{
    pub fn new(db: B, gateway: G) -> Self {
        Self { db, gateway }
    }

    /// Initiates a payment for a pending pledge.
    ///
    /// The database transaction commits first (payment row, pledge flip, outbox event); only then
    /// is the gateway asked for a checkout session. A gateway failure after the commit moves the
    /// payment to `failed` through the ordinary transition function, so the attempt's whole story
    /// stays in the audit trail.
    pub async fn initiate_payment(
        &self,
        pledge_id: &PledgeId,
        urls: &RedirectUrls,
    ) -> Result<PaymentInitiation, PaymentGatewayError> {
        let transaction_id = new_transaction_id();
        let payment = self.db.initiate_payment(pledge_id, &transaction_id).await?;
        let pledge = self
            .db
            .fetch_pledge(pledge_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::PledgeNotFound(pledge_id.clone()))?;
        info!("💳️ Initiating gateway session for payment {} (txid {transaction_id})", payment.id);
        let request = session_request(&payment, &pledge, urls);
        let session = match self.gateway.initiate_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!("💳️ Gateway session for payment {} failed: {e}", payment.id);
                let extra = TransitionExtra {
                    error_message: Some(format!("Gateway session initiation failed: {e}")),
                    ..Default::default()
                };
                self.db
                    .transition_payment(&payment.id, PaymentStatus::Failed, extra, Some("gateway session failed"))
                    .await?;
                return Err(PaymentGatewayError::GatewayError(e.to_string()));
            },
        };
        // Best effort. A payment without the session blob is still a valid pending payment;
        // manual gateway reconciliation can recover the rest.
        if let Err(e) = self.db.update_gateway_response(&payment.id, &session.raw).await {
            warn!("💳️ Could not store the gateway session for payment {}: {e}", payment.id);
        }
        debug!("💳️ Payment {} has a gateway session ({})", payment.id, session.session_key);
        Ok(PaymentInitiation { payment, gateway_url: session.gateway_url, session_key: session.session_key })
    }

    /// Applies a single state transition. This is the only way any caller changes a payment
    /// status.
    pub async fn transition(
        &self,
        id: &PaymentId,
        target: PaymentStatus,
        extra: TransitionExtra,
        reason: Option<&str>,
    ) -> Result<Payment, PaymentGatewayError> {
        self.db.transition_payment(id, target, extra, reason).await
    }

    /// Refunds a completed payment. The gateway refund call happens first; only a gateway-side
    /// success moves the state machine to `refunded`.
    pub async fn refund(&self, id: &PaymentId, reason: &str) -> Result<Payment, PaymentGatewayError> {
        let payment =
            self.db.fetch_payment(id).await?.ok_or_else(|| PaymentGatewayError::PaymentNotFound(id.to_string()))?;
        if payment.status != PaymentStatus::Completed {
            return Err(PaymentGatewayError::RefundNotAllowed { payment_id: id.clone(), status: payment.status });
        }
        let bank_transaction_id =
            payment.bank_transaction_id().ok_or_else(|| PaymentGatewayError::NoBankTransactionId(id.clone()))?;
        info!("💳️ Requesting gateway refund for payment {id} ({bank_transaction_id})");
        let response = self
            .gateway
            .initiate_refund(&bank_transaction_id, payment.amount, reason)
            .await
            .map_err(|e| PaymentGatewayError::GatewayError(e.to_string()))?;
        let extra = TransitionExtra {
            refund_reason: Some(reason.to_string()),
            gateway_response: Some(response),
            ..Default::default()
        };
        let payment = self.db.transition_payment(id, PaymentStatus::Refunded, extra, Some("refund")).await?;
        info!("💳️ Payment {id} refunded");
        Ok(payment)
    }

    /// Asks the gateway for its view of one of our transactions. The manual reconciliation
    /// escape hatch for payments whose webhooks never arrived.
    pub async fn validate_with_gateway(&self, id: &PaymentId) -> Result<GatewayValidation, PaymentGatewayError> {
        let payment =
            self.db.fetch_payment(id).await?.ok_or_else(|| PaymentGatewayError::PaymentNotFound(id.to_string()))?;
        self.gateway
            .query_transaction(&payment.transaction_id)
            .await
            .map_err(|e| PaymentGatewayError::GatewayError(e.to_string()))
    }

    pub async fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, PaymentGatewayError> {
        self.db.fetch_payment(id).await
    }

    pub async fn fetch_payment_for_pledge(&self, pledge_id: &PledgeId) -> Result<Option<Payment>, PaymentGatewayError> {
        self.db.fetch_payment_by_pledge(pledge_id).await
    }

    pub async fn fetch_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, PaymentGatewayError> {
        self.db.fetch_payment_by_transaction_id(transaction_id).await
    }

    pub async fn fetch_pledge(&self, id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError> {
        self.db.fetch_pledge(id).await
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

fn session_request(payment: &Payment, pledge: &Pledge, urls: &RedirectUrls) -> GatewaySessionRequest {
    let customer_name = match (&pledge.donor_name, pledge.is_anonymous) {
        (Some(name), false) => name.clone(),
        _ => "Anonymous donor".to_string(),
    };
    GatewaySessionRequest {
        transaction_id: payment.transaction_id.clone(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        product_name: format!("Donation to campaign {}", pledge.campaign_id),
        customer_name,
        customer_email: pledge.donor_email.clone(),
        success_url: urls.success_url.clone(),
        fail_url: urls.fail_url.clone(),
        cancel_url: urls.cancel_url.clone(),
        ipn_url: urls.ipn_url.clone(),
    }
}
