use std::future::Future;

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::IdempotencyRecord,
    helpers::request_hash,
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

/// How long a stored response keeps answering for its key.
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// A response as seen through the guard: either freshly produced by the handler or replayed from
/// a previous request with the same key.
#[derive(Debug, Clone)]
pub struct GuardedResponse {
    pub status: i64,
    pub body: String,
    pub replayed: bool,
}

/// Deduplicates client-initiated mutations by idempotency key.
///
/// A repeated key with the same request body gets the stored response back, without the handler
/// running again. A repeated key with a *different* body is a client bug and is refused outright.
/// Storage of the response is best effort: a failed store costs one lost replay, never a lost
/// payment.
pub struct IdempotencyGuard<B> {
    db: B,
    ttl: Duration,
}

impl<B: PaymentGatewayDatabase> IdempotencyGuard<B> {
    pub fn new(db: B) -> Self {
        Self { db, ttl: Duration::hours(IDEMPOTENCY_TTL_HOURS) }
    }

    pub fn with_ttl(db: B, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Runs `handler` at most once per `(key, body)` pair within the TTL.
    ///
    /// The handler returns the `(status, body)` pair to store and replay. Handler errors are
    /// passed through untouched and nothing is stored for them, so the client may retry with the
    /// same key.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        body: &serde_json::Value,
        handler: F,
    ) -> Result<GuardedResponse, PaymentGatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(i64, serde_json::Value), PaymentGatewayError>>,
    {
        let hash = request_hash(body);
        let now = Utc::now();
        if let Some(record) = self.db.fetch_idempotency_record(key, now).await? {
            if record.request_hash != hash {
                warn!("🔁️ Idempotency key '{key}' reused with a different request body");
                return Err(PaymentGatewayError::IdempotencyKeyConflict(key.to_string()));
            }
            debug!("🔁️ Replaying stored response for idempotency key '{key}'");
            return Ok(GuardedResponse { status: record.response_status, body: record.response_body, replayed: true });
        }
        let (status, response) = handler().await?;
        let response_body = response.to_string();
        let record = IdempotencyRecord {
            idempotency_key: key.to_string(),
            request_hash: hash,
            response_body: response_body.clone(),
            response_status: status,
            created_at: now,
            expires_at: now + self.ttl,
        };
        if let Err(e) = self.db.store_idempotency_record(record).await {
            // The operation itself committed. Losing the replay record only means a retry with
            // this key runs into the domain-level guards instead.
            warn!("🔁️ Could not store idempotency record for '{key}': {e}");
        }
        Ok(GuardedResponse { status, body: response_body, replayed: false })
    }
}
