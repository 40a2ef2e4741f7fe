//! The trait seams of the engine.
//!
//! * [`PaymentGatewayDatabase`] — everything the APIs need from the relational store. The store is
//!   the single arbiter of truth; every multi-step operation on this trait is atomic.
//! * [`PaymentGatewayClient`] — the external payment gateway, consumed as a capability.
//! * The queue substrate seam lives in [`crate::events::EventQueue`].

mod gateway;
mod payment_gateway_database;

pub use gateway::{GatewayError, GatewaySession, GatewaySessionRequest, GatewayValidation, PaymentGatewayClient};
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
