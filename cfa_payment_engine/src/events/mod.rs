//! Event plumbing between the payment core and its consumers.
//!
//! The queue substrate itself is an external dependency; this module defines the small surface the
//! engine needs from it ([`EventQueue`]), the event-type vocabulary and payloads shared with
//! consumers, and a bounded in-process implementation ([`MemoryQueue`]) built on tokio channels.

mod channel;
pub mod event_types;
mod queue;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use queue::{EventQueue, MemoryQueue, QueueConsumers, QueueError, QueueHooks};
