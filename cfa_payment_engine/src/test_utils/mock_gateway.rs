use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
    Mutex,
};

use cfa_common::Money;
use serde_json::json;

use crate::traits::{GatewayError, GatewaySession, GatewaySessionRequest, GatewayValidation, PaymentGatewayClient};

/// A scripted gateway double. By default every call succeeds with a plausible response; tests can
/// script failures and custom validation statuses, and inspect call counts afterwards.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    session_calls: AtomicUsize,
    validate_calls: AtomicUsize,
    refund_calls: AtomicUsize,
    fail_sessions: Mutex<bool>,
    fail_refunds: Mutex<bool>,
    validation_status: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// All subsequent session initiations fail as unreachable.
    pub fn fail_sessions(&self) {
        *self.inner.fail_sessions.lock().unwrap() = true;
    }

    pub fn fail_refunds(&self) {
        *self.inner.fail_refunds.lock().unwrap() = true;
    }

    /// Overrides the status returned by validation and status queries (default `VALID`).
    pub fn set_validation_status(&self, status: &str) {
        *self.inner.validation_status.lock().unwrap() = Some(status.to_string());
    }

    pub fn session_calls(&self) -> usize {
        self.inner.session_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> usize {
        self.inner.validate_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.inner.refund_calls.load(Ordering::SeqCst)
    }

    fn status(&self) -> String {
        self.inner.validation_status.lock().unwrap().clone().unwrap_or_else(|| "VALID".to_string())
    }
}

impl PaymentGatewayClient for MockGateway {
    async fn initiate_session(&self, request: &GatewaySessionRequest) -> Result<GatewaySession, GatewayError> {
        self.inner.session_calls.fetch_add(1, Ordering::SeqCst);
        if *self.inner.fail_sessions.lock().unwrap() {
            return Err(GatewayError::Unreachable("scripted session failure".to_string()));
        }
        let session_key = format!("SESSION-{}", request.transaction_id);
        Ok(GatewaySession {
            gateway_url: format!("https://gateway.test/checkout/{session_key}"),
            session_key: session_key.clone(),
            raw: json!({"status": "SUCCESS", "sessionkey": session_key, "bank_tran_id": format!("BANK-{}", request.transaction_id)}),
        })
    }

    async fn validate_transaction(&self, val_id: &str) -> Result<GatewayValidation, GatewayError> {
        self.inner.validate_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.status();
        Ok(GatewayValidation {
            status: status.clone(),
            raw: json!({"status": status, "val_id": val_id, "bank_tran_id": format!("BANK-{val_id}")}),
        })
    }

    async fn query_transaction(&self, transaction_id: &str) -> Result<GatewayValidation, GatewayError> {
        let status = self.status();
        Ok(GatewayValidation { status: status.clone(), raw: json!({"status": status, "tran_id": transaction_id}) })
    }

    async fn initiate_refund(
        &self,
        bank_transaction_id: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        self.inner.refund_calls.fetch_add(1, Ordering::SeqCst);
        if *self.inner.fail_refunds.lock().unwrap() {
            return Err(GatewayError::Rejected("scripted refund failure".to_string()));
        }
        Ok(json!({"status": "success", "bank_tran_id": bank_transaction_id, "amount": amount, "remarks": remarks}))
    }
}
