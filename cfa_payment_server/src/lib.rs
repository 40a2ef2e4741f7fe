//! # CareForAll payment server
//!
//! The HTTP surface over the payment reconciliation engine:
//! * `/api/*` — authenticated donor and admin operations (initiation, lookups, validation,
//!   refunds).
//! * `/payments/webhook/*` — the four public gateway callback channels.
//!
//! The server also hosts the background event pipeline: the outbox relay and the in-process
//! queue consumers that feed the pledge and read-model projectors.

pub mod auth;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod routes;
pub mod server;
pub mod workers;
