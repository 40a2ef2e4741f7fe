use cfa_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything the gateway needs to open a hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySessionRequest {
    pub transaction_id: String,
    pub amount: Money,
    pub currency: String,
    pub product_name: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub fail_url: String,
    pub cancel_url: String,
    pub ipn_url: String,
}

/// A successfully opened checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    /// Where to redirect the donor's browser.
    pub gateway_url: String,
    pub session_key: String,
    /// The raw gateway response, persisted onto the payment for audit.
    pub raw: serde_json::Value,
}

/// The gateway's view of a transaction, as returned by validation or a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayValidation {
    /// Gateway status string; `VALID` and `VALIDATED` mean the transaction is genuine and paid.
    pub status: String,
    pub raw: serde_json::Value,
}

impl GatewayValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self.status.as_str(), "VALID" | "VALIDATED")
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The payment gateway could not be reached: {0}")]
    Unreachable(String),
    #[error("The payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("The payment gateway returned a response we could not interpret: {0}")]
    InvalidResponse(String),
}

/// The third-party payment gateway, consumed as a capability.
///
/// The engine never calls these from inside a database transaction; that is the point of the
/// outbox and of the post-commit session call in the initiation flow.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayClient: Clone + Send + Sync {
    /// Opens a hosted checkout session and returns the redirect URL for the donor's browser.
    async fn initiate_session(&self, request: &GatewaySessionRequest) -> Result<GatewaySession, GatewayError>;

    /// Validates a gateway-issued validation id against the gateway's own records. This is the
    /// anti-spoofing check for the IPN channel: anyone can POST to a public webhook URL, but only
    /// the gateway holds a validated transaction record.
    async fn validate_transaction(&self, val_id: &str) -> Result<GatewayValidation, GatewayError>;

    /// Queries the gateway's status for one of our transaction ids. The manual reconciliation
    /// escape hatch.
    async fn query_transaction(&self, transaction_id: &str) -> Result<GatewayValidation, GatewayError>;

    /// Initiates a refund against the gateway's bank transaction reference.
    async fn initiate_refund(
        &self,
        bank_transaction_id: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<serde_json::Value, GatewayError>;
}
