//! Small pure helpers: correlation id generation, request hashing for the idempotency guard, and
//! webhook deduplication ids.

use std::{fmt::Display, str::FromStr};

use blake2::{Blake2b512, Digest};
use chrono::Utc;
use rand::Rng;

/// Prefix for externally visible transaction correlation ids.
pub const TRANSACTION_ID_PREFIX: &str = "CFA";

/// Generates a transaction correlation id of the form `CFA-<unix millis>-<8 hex chars>`.
///
/// This id is handed to the gateway at session initiation and is the join key for every callback
/// the gateway sends afterwards, so it must be unique per payment attempt.
pub fn new_transaction_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let entropy: u32 = rand::thread_rng().gen();
    format!("{TRANSACTION_ID_PREFIX}-{millis}-{entropy:08x}")
}

/// Blake2b-512 hash of the canonical JSON serialisation of a request body, hex encoded.
///
/// Used to detect idempotency-key reuse across logically different requests.
pub fn request_hash(body: &serde_json::Value) -> String {
    let canonical = body.to_string();
    let mut hasher = Blake2b512::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

//--------------------------------------  WebhookChannel  ------------------------------------------------------------

/// The four inbound channels the gateway can reach us on. The three redirect channels are driven
/// by browser navigation and carry no integrity guarantee; `ipn` is server-to-server and carries a
/// validation id we can check back with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookChannel {
    Success,
    Fail,
    Cancel,
    Ipn,
}

impl WebhookChannel {
    /// Deterministic deduplication id for one physical webhook delivery.
    ///
    /// The fail/cancel channels have no validation id, so their id incorporates the current
    /// timestamp. Exact retries of those deliveries are therefore *not* caught by the webhook log;
    /// the state machine's transition validation is the backstop.
    pub fn webhook_id(self, transaction_id: &str, val_id: Option<&str>) -> String {
        let suffix = match (self, val_id) {
            (WebhookChannel::Success | WebhookChannel::Ipn, Some(val_id)) => val_id.to_string(),
            _ => Utc::now().timestamp_millis().to_string(),
        };
        format!("{}-{transaction_id}-{suffix}", self.id_prefix())
    }

    fn id_prefix(self) -> &'static str {
        match self {
            WebhookChannel::Success => "success",
            WebhookChannel::Fail => "fail",
            WebhookChannel::Cancel => "cancel",
            WebhookChannel::Ipn => "ipn",
        }
    }
}

impl Display for WebhookChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookChannel::Success => write!(f, "success"),
            WebhookChannel::Fail => write!(f, "failure"),
            WebhookChannel::Cancel => write!(f, "cancel"),
            WebhookChannel::Ipn => write!(f, "ipn"),
        }
    }
}

impl FromStr for WebhookChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "fail" | "failure" => Ok(Self::Fail),
            "cancel" => Ok(Self::Cancel),
            "ipn" => Ok(Self::Ipn),
            s => Err(format!("Unknown webhook channel: {s}")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_id_format() {
        let id = new_transaction_id();
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "CFA");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn transaction_ids_are_unique() {
        let a = new_transaction_id();
        let b = new_transaction_id();
        assert_ne!(a, b);
    }

    #[test]
    fn request_hash_is_stable_and_sensitive() {
        let body = serde_json::json!({"pledge_id": "p-1", "success_url": "https://example.com/ok"});
        let same = serde_json::json!({"pledge_id": "p-1", "success_url": "https://example.com/ok"});
        let different = serde_json::json!({"pledge_id": "p-2", "success_url": "https://example.com/ok"});
        assert_eq!(request_hash(&body), request_hash(&same));
        assert_ne!(request_hash(&body), request_hash(&different));
        assert_eq!(request_hash(&body).len(), 128);
    }

    #[test]
    fn webhook_ids_use_val_id_when_present() {
        let id = WebhookChannel::Ipn.webhook_id("CFA-1-abc", Some("VAL42"));
        assert_eq!(id, "ipn-CFA-1-abc-VAL42");
        let id = WebhookChannel::Success.webhook_id("CFA-1-abc", Some("VAL42"));
        assert_eq!(id, "success-CFA-1-abc-VAL42");
    }

    #[test]
    fn fail_webhook_ids_fall_back_to_timestamp() {
        let id = WebhookChannel::Fail.webhook_id("CFA-1-abc", None);
        assert!(id.starts_with("fail-CFA-1-abc-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert!(suffix.parse::<i64>().is_ok());
    }
}
