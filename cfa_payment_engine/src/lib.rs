//! # CareForAll payment engine
//!
//! This crate is the payment reconciliation core of the CareForAll donation platform. It turns the
//! asynchronous, unreliable signals coming out of the payment gateway (browser redirects, IPN
//! webhooks, direct API calls) into a single monotonic state per payment, and propagates that
//! state to the pledge aggregate and the denormalised read models through a transactional outbox.
//!
//! The main entry points are:
//! * [`PaymentFlowApi`] — payment initiation, the state machine transition function, refunds and
//!   manual gateway reconciliation.
//! * [`WebhookApi`] — normalises the four inbound gateway channels into state machine transitions.
//! * [`IdempotencyGuard`] — deduplicates client-initiated requests by idempotency key.
//! * [`OutboxRelay`] — republishes committed outbox rows onto the queue substrate.
//! * [`PledgeProjector`] and [`ReadModelProjector`] — queue consumers that advance the pledge
//!   aggregate and the campaign/user/platform aggregates.
//!
//! Storage is abstracted behind [`traits::PaymentGatewayDatabase`]; [`SqliteDatabase`] is the
//! bundled implementation. The gateway and the queue substrate are consumed capabilities, see
//! [`traits::PaymentGatewayClient`] and [`events::EventQueue`].

pub mod db_types;
pub mod events;
pub mod helpers;
pub mod traits;

mod pfe_api;
mod sqlite;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use pfe_api::{
    CallbackData,
    GuardedResponse,
    IdempotencyGuard,
    OutboxRelay,
    PaymentFlowApi,
    PaymentInitiation,
    PledgeProjector,
    ReadModelProjector,
    RedirectUrls,
    RelayConfig,
    WebhookApi,
    WebhookOutcome,
};
pub use sqlite::SqliteDatabase;
