//! SSLCommerz gateway client.
//!
//! Implements the engine's [`PaymentGatewayClient`] seam over the SSLCommerz v4 REST API:
//! hosted checkout sessions, IPN validation, transaction status queries and refunds.

use cfa_payment_engine::traits::{
    GatewayError,
    GatewaySession,
    GatewaySessionRequest,
    GatewayValidation,
    PaymentGatewayClient,
};
use cfa_common::Money;
use log::*;
use serde_json::Value;

use crate::config::GatewayConfig;

#[derive(Clone)]
pub struct SslCommerzClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl SslCommerzClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }

    fn credentials(&self) -> [(&'static str, String); 2] {
        [("store_id", self.config.store_id.clone()), ("store_passwd", self.config.store_password.reveal().clone())]
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, GatewayError> {
        let url = format!("{}{path}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        response.json::<Value>().await.map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

impl PaymentGatewayClient for SslCommerzClient {
    async fn initiate_session(&self, request: &GatewaySessionRequest) -> Result<GatewaySession, GatewayError> {
        let [store_id, store_passwd] = self.credentials();
        let form = [
            store_id,
            store_passwd,
            ("total_amount", request.amount.to_taka_string()),
            ("currency", request.currency.clone()),
            ("tran_id", request.transaction_id.clone()),
            ("success_url", request.success_url.clone()),
            ("fail_url", request.fail_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("ipn_url", request.ipn_url.clone()),
            ("product_name", request.product_name.clone()),
            ("product_category", "donation".to_string()),
            ("product_profile", "non-physical-goods".to_string()),
            ("cus_name", request.customer_name.clone()),
            ("cus_email", request.customer_email.clone().unwrap_or_else(|| "anonymous@careforall.org".to_string())),
            ("cus_add1", "N/A".to_string()),
            ("cus_city", "N/A".to_string()),
            ("cus_country", "Bangladesh".to_string()),
            ("cus_phone", "N/A".to_string()),
            ("shipping_method", "NO".to_string()),
        ];
        let url = format!("{}/gwprocess/v4/api.php", self.config.base_url);
        trace!("🌐️ POST {url} for txn {}", request.transaction_id);
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        if status != "SUCCESS" {
            let reason = body.get("failedreason").and_then(Value::as_str).unwrap_or("no reason given");
            return Err(GatewayError::Rejected(reason.to_string()));
        }
        let gateway_url = body
            .get("GatewayPageURL")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("Missing GatewayPageURL".to_string()))?
            .to_string();
        let session_key = body.get("sessionkey").and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(GatewaySession { gateway_url, session_key, raw: body })
    }

    async fn validate_transaction(&self, val_id: &str) -> Result<GatewayValidation, GatewayError> {
        let [store_id, store_passwd] = self.credentials();
        let query = [
            ("val_id", val_id.to_string()),
            store_id,
            store_passwd,
            ("format", "json".to_string()),
        ];
        let body = self.get_json("/validator/api/validationserverAPI.php", &query).await?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("INVALID").to_string();
        Ok(GatewayValidation { status, raw: body })
    }

    async fn query_transaction(&self, transaction_id: &str) -> Result<GatewayValidation, GatewayError> {
        let [store_id, store_passwd] = self.credentials();
        let query = [
            ("tran_id", transaction_id.to_string()),
            store_id,
            store_passwd,
            ("format", "json".to_string()),
        ];
        let body = self.get_json("/validator/api/merchantTransIDvalidationAPI.php", &query).await?;
        // The by-transaction endpoint wraps its matches in an `element` array; the newest entry
        // carries the current status.
        let status = body
            .get("element")
            .and_then(Value::as_array)
            .and_then(|elements| elements.first())
            .and_then(|e| e.get("status"))
            .or_else(|| body.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("INVALID")
            .to_string();
        Ok(GatewayValidation { status, raw: body })
    }

    async fn initiate_refund(
        &self,
        bank_transaction_id: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<Value, GatewayError> {
        let [store_id, store_passwd] = self.credentials();
        let query = [
            ("bank_tran_id", bank_transaction_id.to_string()),
            ("refund_amount", amount.to_taka_string()),
            ("refund_remarks", remarks.to_string()),
            store_id,
            store_passwd,
            ("format", "json".to_string()),
        ];
        let body = self.get_json("/validator/api/merchantTransIDvalidationAPI.php", &query).await?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        if !matches!(status, "success" | "SUCCESS") {
            let reason = body.get("errorReason").and_then(Value::as_str).unwrap_or("refund refused");
            return Err(GatewayError::Rejected(reason.to_string()));
        }
        info!("🌐️ Gateway accepted refund against {bank_transaction_id}");
        Ok(body)
    }
}
