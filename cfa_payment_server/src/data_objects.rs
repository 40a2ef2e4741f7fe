//! Request and response shapes for the HTTP surface.

use cfa_payment_engine::CallbackData;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitiatePaymentRequest {
    pub pledge_id: String,
    /// Browser redirect overrides. Absent fields fall back to the server's configured callbacks.
    pub success_url: Option<String>,
    pub fail_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

/// The envelope every webhook endpoint answers with. Webhooks always get HTTP 200 so the gateway
/// stops retrying; `success` reports whether the delivery changed anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// A gateway callback body, as posted (form-encoded) to any of the four webhook endpoints.
/// Everything except the transaction id is optional; unknown fields are preserved into the raw
/// blob for the webhook log.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayCallback {
    pub tran_id: String,
    pub val_id: Option<String>,
    pub amount: Option<String>,
    pub card_type: Option<String>,
    pub status: Option<String>,
    pub bank_tran_id: Option<String>,
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl From<GatewayCallback> for CallbackData {
    fn from(cb: GatewayCallback) -> Self {
        let mut raw = json!({
            "tran_id": cb.tran_id.clone(),
            "val_id": cb.val_id.clone(),
            "amount": cb.amount,
            "card_type": cb.card_type.clone(),
            "status": cb.status.clone(),
            "bank_tran_id": cb.bank_tran_id,
            "error": cb.error.clone(),
        });
        if let serde_json::Value::Object(map) = &mut raw {
            for (k, v) in cb.extra {
                map.entry(k).or_insert(v);
            }
        }
        CallbackData {
            transaction_id: cb.tran_id,
            val_id: cb.val_id,
            payment_method: cb.card_type,
            status: cb.status,
            error: cb.error,
            raw,
        }
    }
}
