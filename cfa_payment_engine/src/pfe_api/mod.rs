//! The public API surfaces of the payment engine.
//!
//! Each API struct is generic over the storage backend (and, where relevant, the gateway client
//! and queue substrate), so the server and the tests wire in whichever implementations they need.

mod idempotency;
mod outbox_relay;
mod payment_flow_api;
mod projectors;
mod webhook_api;

pub use idempotency::{GuardedResponse, IdempotencyGuard};
pub use outbox_relay::{OutboxRelay, RelayConfig};
pub use payment_flow_api::{PaymentFlowApi, PaymentInitiation, RedirectUrls};
pub use projectors::{PledgeProjector, ReadModelProjector};
pub use webhook_api::{CallbackData, WebhookApi, WebhookOutcome};
