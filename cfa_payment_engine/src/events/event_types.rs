use cfa_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{Payment, PaymentStatus, Pledge};

// Payment events. One canonical event per target status, plus the channel-independent
// `payment.complete` emitted whenever a transition ends the attempt.
pub const PAYMENT_AUTHORIZED: &str = "payment.authorized";
pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const PAYMENT_REFUNDED: &str = "payment.refunded";
pub const PAYMENT_COMPLETE: &str = "payment.complete";

// Pledge events.
pub const PLEDGE_CREATED: &str = "pledge.created";
pub const PLEDGE_PAYMENT_INITIATED: &str = "pledge.payment_initiated";
pub const PLEDGE_COMPLETED: &str = "pledge.completed";
pub const PLEDGE_CANCELLED: &str = "pledge.cancelled";

// Queue names on the substrate.
pub const PAYMENT_EVENTS_QUEUE: &str = "payment-events";
pub const PLEDGE_EVENTS_QUEUE: &str = "pledge-events";

/// The canonical event type announcing that a payment reached `status`.
pub fn canonical_event_for(status: PaymentStatus) -> Option<&'static str> {
    match status {
        PaymentStatus::Pending => None,
        PaymentStatus::Authorized => Some(PAYMENT_AUTHORIZED),
        PaymentStatus::Captured => Some(PAYMENT_CAPTURED),
        PaymentStatus::Completed => Some(PAYMENT_COMPLETED),
        PaymentStatus::Failed => Some(PAYMENT_FAILED),
        PaymentStatus::Refunded => Some(PAYMENT_REFUNDED),
    }
}

/// Routes an event type to its queue by prefix.
pub fn queue_for_event(event_type: &str) -> Option<&'static str> {
    if event_type.starts_with("payment.") {
        Some(PAYMENT_EVENTS_QUEUE)
    } else if event_type.starts_with("pledge.") {
        Some(PLEDGE_EVENTS_QUEUE)
    } else {
        None
    }
}

/// One message as delivered by the queue substrate. Consumers must tolerate redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl QueueMessage {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { event_type: event_type.into(), payload }
    }
}

/// Payload for every `payment.*` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEventPayload {
    pub payment_id: String,
    pub pledge_id: String,
    pub transaction_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
}

impl From<&Payment> for PaymentEventPayload {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id.to_string(),
            pledge_id: payment.pledge_id.to_string(),
            transaction_id: payment.transaction_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            payment_method: payment.payment_method.clone(),
        }
    }
}

/// Payload for `pledge.completed` (and the other pledge lifecycle events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PledgeEventPayload {
    pub pledge_id: String,
    pub campaign_id: String,
    pub user_id: Option<String>,
    pub amount: Money,
}

impl From<&Pledge> for PledgeEventPayload {
    fn from(pledge: &Pledge) -> Self {
        Self {
            pledge_id: pledge.id.to_string(),
            campaign_id: pledge.campaign_id.clone(),
            user_id: pledge.user_id.clone(),
            amount: pledge.amount,
        }
    }
}

/// Payload for `pledge.payment_initiated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInitiatedPayload {
    pub pledge_id: String,
    pub payment_id: String,
    pub transaction_id: String,
    pub amount: Money,
}
