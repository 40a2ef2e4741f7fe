use std::{fmt::Display, str::FromStr};

use cfa_common::Money;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------   PaymentStatus   -----------------------------------------------------------

/// The lifecycle of a payment attempt. The stored status column is the single source of truth for
/// "did the money move"; it only ever changes through [`crate::PaymentFlowApi::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// The payment row exists and a gateway session may have been opened, but no confirmation has
    /// been received yet.
    Pending,
    /// The gateway has acknowledged the payment attempt (first confirmation of a two-phase
    /// capture).
    Authorized,
    /// The gateway has captured the funds but the attempt has not been confirmed end-to-end.
    Captured,
    /// The money moved. The only status a refund can start from.
    Completed,
    /// The attempt failed, was rejected, or was cancelled by the donor. Terminal.
    Failed,
    /// A completed payment that has been refunded. Terminal.
    Refunded,
}

impl PaymentStatus {
    /// The legal transition table. Everything not listed here is rejected, which is what makes
    /// arbitrary interleaving of webhook channels safe.
    pub fn can_transition_to(self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Pending, Authorized | Failed) |
                (Authorized, Captured | Failed) |
                (Captured, Completed | Failed) |
                (Completed, Refunded)
        )
    }

    /// True when no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    /// True when this status ends the payment *attempt*. `completed` is not terminal in the state
    /// machine sense (it can still be refunded), but it does end the attempt, which is what
    /// downstream consumers of `payment.complete` care about.
    pub fn ends_attempt(self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    /// The next step on the happy path towards `completed`, if there is one.
    pub fn next_towards_completed(self) -> Option<PaymentStatus> {
        match self {
            PaymentStatus::Pending => Some(PaymentStatus::Authorized),
            PaymentStatus::Authorized => Some(PaymentStatus::Captured),
            PaymentStatus::Captured => Some(PaymentStatus::Completed),
            _ => None,
        }
    }

    pub fn all() -> [PaymentStatus; 6] {
        use PaymentStatus::*;
        [Pending, Authorized, Captured, Completed, Failed, Refunded]
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Authorized => write!(f, "authorized"),
            PaymentStatus::Captured => write!(f, "captured"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status: {0}")]
pub struct StatusConversionError(String);

impl FromStr for PaymentStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "authorized" => Ok(Self::Authorized),
            "captured" => Ok(Self::Captured),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            s => Err(StatusConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to pending");
            PaymentStatus::Pending
        })
    }
}

//--------------------------------------   PledgeStatus   ------------------------------------------------------------

/// Status walk for the pledge aggregate. The payment core never writes pledges directly except
/// through the pledge projector reacting to payment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    Pending,
    PaymentInitiated,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PledgeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PledgeStatus::Completed | PledgeStatus::Failed | PledgeStatus::Refunded | PledgeStatus::Cancelled)
    }
}

impl Display for PledgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PledgeStatus::Pending => write!(f, "pending"),
            PledgeStatus::PaymentInitiated => write!(f, "payment_initiated"),
            PledgeStatus::Completed => write!(f, "completed"),
            PledgeStatus::Failed => write!(f, "failed"),
            PledgeStatus::Refunded => write!(f, "refunded"),
            PledgeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for PledgeStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "payment_initiated" => Ok(Self::PaymentInitiated),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            s => Err(StatusConversionError(format!("Invalid pledge status: {s}"))),
        }
    }
}

//--------------------------------------      PaymentId      ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PaymentId(pub String);

impl PaymentId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PaymentId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PaymentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------      PledgeId       ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PledgeId(pub String);

impl PledgeId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PledgeId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PledgeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for PledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------       Payment       ---------------------------------------------------------

/// One payment attempt per pledge (1:1, enforced by a unique index on `pledge_id`).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub pledge_id: PledgeId,
    /// Externally visible correlation id, `CFA-<millis>-<hex8>`. The join key with all gateway
    /// callbacks.
    pub transaction_id: String,
    /// Copied from the pledge at creation. Never re-read from the pledge afterwards.
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    /// Last gateway response blob (JSON text, last-writer-wins). Audit only.
    pub gateway_response: Option<String>,
    pub error_message: Option<String>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The gateway's bank transaction reference, if a gateway response carrying one was stored.
    /// Needed to initiate a refund.
    pub fn bank_transaction_id(&self) -> Option<String> {
        let raw = self.gateway_response.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value.get("bank_tran_id").and_then(|v| v.as_str()).map(String::from)
    }

    pub fn gateway_response_json(&self) -> Option<serde_json::Value> {
        self.gateway_response.as_deref().and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Field updates that may accompany a status transition. Everything is optional; `status` itself
/// is not here because it is the transition target, not an auxiliary field.
#[derive(Debug, Clone, Default)]
pub struct TransitionExtra {
    pub payment_method: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub refund_reason: Option<String>,
}

impl TransitionExtra {
    pub fn with_gateway_response(response: serde_json::Value) -> Self {
        Self { gateway_response: Some(response), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.payment_method.is_none() &&
            self.gateway_response.is_none() &&
            self.error_message.is_none() &&
            self.refund_reason.is_none()
    }
}

//--------------------------------------  StateTransition  -----------------------------------------------------------

/// One row per applied transition. Append-only, audit only, never read by business logic.
#[derive(Debug, Clone, FromRow)]
pub struct StateTransition {
    pub id: i64,
    pub payment_id: PaymentId,
    pub from_status: PaymentStatus,
    pub to_status: PaymentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------       Pledge        ---------------------------------------------------------

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Pledge {
    pub id: PledgeId,
    pub campaign_id: String,
    /// None for anonymous donors.
    pub user_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub status: PledgeStatus,
    /// The payment transaction id, set when the pledge reaches a payment-driven terminal state.
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPledge {
    pub campaign_id: String,
    pub user_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
}

impl NewPledge {
    pub fn new(campaign_id: impl Into<String>, user_id: Option<String>, amount: Money) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            user_id,
            amount,
            currency: cfa_common::BDT_CURRENCY_CODE.to_string(),
            message: None,
            is_anonymous: false,
            donor_name: None,
            donor_email: None,
        }
    }
}

//--------------------------------------    OutboxEvent      ---------------------------------------------------------

/// A locally committed intent row. Created in the same transaction as the state change it
/// announces; the relay publishes it to the queue substrate after commit.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn payment(payment_id: &PaymentId, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            aggregate_id: payment_id.to_string(),
            aggregate_type: "payment".to_string(),
            event_type: event_type.to_string(),
            payload,
        }
    }

    pub fn pledge(pledge_id: &PledgeId, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            aggregate_id: pledge_id.to_string(),
            aggregate_type: "pledge".to_string(),
            event_type: event_type.to_string(),
            payload,
        }
    }
}

//--------------------------------------     WebhookLog      ---------------------------------------------------------

/// Deduplication and audit record for one physical webhook delivery. Gateways retry deliveries;
/// this table guarantees at most one transition attempt per recorded delivery. It is an
/// optimisation, not the correctness backstop; the state machine is.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookLog {
    pub webhook_id: String,
    pub event_type: String,
    pub payload: String,
    pub processed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

//--------------------------------------  IdempotencyRecord  ---------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub request_hash: String,
    pub response_body: String,
    pub response_status: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

//--------------------------------------    Read models      ---------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct DonationRecord {
    pub pledge_id: PledgeId,
    pub campaign_id: String,
    pub donor_id: Option<String>,
    pub amount: Money,
    pub settled: bool,
    pub donated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CampaignTotals {
    pub campaign_id: String,
    pub raised_amount: Money,
    pub donor_count: i64,
    pub last_donation_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserStatistics {
    pub user_id: String,
    pub total_donated: Money,
    pub campaigns_supported: i64,
    pub donation_count: i64,
    pub first_donation_at: DateTime<Utc>,
    pub last_donation_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PlatformStatistics {
    pub id: i64,
    pub total_raised: Money,
    pub total_donations: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transition_table_matches_spec() {
        use PaymentStatus::*;
        let legal = [
            (Pending, Authorized),
            (Pending, Failed),
            (Authorized, Captured),
            (Authorized, Failed),
            (Captured, Completed),
            (Captured, Failed),
            (Completed, Refunded),
        ];
        for from in PaymentStatus::all() {
            for to in PaymentStatus::all() {
                let expected = legal.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Completed.ends_attempt());
        assert!(PaymentStatus::Failed.ends_attempt());
        assert!(!PaymentStatus::Captured.ends_attempt());
    }

    #[test]
    fn happy_path_walk() {
        let mut status = PaymentStatus::Pending;
        let mut walk = vec![status];
        while let Some(next) = status.next_towards_completed() {
            walk.push(next);
            status = next;
        }
        use PaymentStatus::*;
        assert_eq!(walk, vec![Pending, Authorized, Captured, Completed]);
    }

    #[test]
    fn status_round_trips() {
        for status in PaymentStatus::all() {
            assert_eq!(status.to_string().parse::<PaymentStatus>().unwrap(), status);
        }
        assert_eq!("payment_initiated".parse::<PledgeStatus>().unwrap(), PledgeStatus::PaymentInitiated);
        assert!("paid".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn bank_transaction_id_from_gateway_blob() {
        let mut payment = Payment {
            id: PaymentId::random(),
            pledge_id: PledgeId::random(),
            transaction_id: "CFA-1-abc".into(),
            amount: Money::from_taka(500),
            currency: "BDT".into(),
            status: PaymentStatus::Completed,
            payment_method: None,
            gateway_response: Some(r#"{"bank_tran_id":"BANK123","status":"VALID"}"#.into()),
            error_message: None,
            refund_reason: None,
            refunded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(payment.bank_transaction_id().as_deref(), Some("BANK123"));
        payment.gateway_response = None;
        assert!(payment.bank_transaction_id().is_none());
    }
}
