use std::sync::Arc;

use log::*;
use thiserror::Error;

use crate::events::{
    channel::{EventHandler, EventProducer, Handler},
    event_types::{queue_for_event, QueueMessage, PAYMENT_EVENTS_QUEUE, PLEDGE_EVENTS_QUEUE},
};

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("No queue is routed for event type '{0}'")]
    NoRoute(String),
    #[error("Failed to enqueue message: {0}")]
    PublishFailed(String),
}

/// The queue substrate, as seen by the producing side.
///
/// Delivery is at-least-once: the outbox relay may republish an event after a crash, and brokers
/// may redeliver to consumers, so every handler downstream must be safely re-runnable.
#[allow(async_fn_in_trait)]
pub trait EventQueue: Clone + Send + Sync {
    async fn publish(&self, event_type: &str, payload: serde_json::Value) -> Result<(), QueueError>;
}

/// Handler registrations for the in-process queue, one slot per queue.
#[derive(Default, Clone)]
pub struct QueueHooks {
    pub on_payment_event: Option<Handler<QueueMessage>>,
    pub on_pledge_event: Option<Handler<QueueMessage>>,
}

impl QueueHooks {
    pub fn on_payment_event<F>(mut self, f: F) -> Self
    where F: (Fn(QueueMessage) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>) + Send + Sync + 'static
    {
        self.on_payment_event = Some(Arc::new(f));
        self
    }

    pub fn on_pledge_event<F>(mut self, f: F) -> Self
    where F: (Fn(QueueMessage) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>) + Send + Sync + 'static
    {
        self.on_pledge_event = Some(Arc::new(f));
        self
    }
}

/// Consumer side of the in-process queue. Owns one [`EventHandler`] per registered queue.
pub struct QueueConsumers {
    payment_events: Option<EventHandler<QueueMessage>>,
    pledge_events: Option<EventHandler<QueueMessage>>,
}

impl QueueConsumers {
    pub fn new(buffer_size: usize, hooks: QueueHooks) -> Self {
        let payment_events = hooks.on_payment_event.map(|f| EventHandler::new(buffer_size, f));
        let pledge_events = hooks.on_pledge_event.map(|f| EventHandler::new(buffer_size, f));
        Self { payment_events, pledge_events }
    }

    /// A producer handle that routes published events to the registered consumers.
    pub fn queue(&self) -> MemoryQueue {
        MemoryQueue {
            payment_events: self.payment_events.as_ref().map(|h| h.subscribe()),
            pledge_events: self.pledge_events.as_ref().map(|h| h.subscribe()),
        }
    }

    /// Spawns the handler loops. Each loop runs until all producer handles are dropped.
    pub fn start(self) {
        if let Some(handler) = self.payment_events {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.pledge_events {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

/// In-process queue substrate built on bounded tokio channels.
///
/// Production deployments put a broker behind [`EventQueue`] instead; the engine code does not
/// care which one it is talking to.
#[derive(Clone)]
pub struct MemoryQueue {
    payment_events: Option<EventProducer<QueueMessage>>,
    pledge_events: Option<EventProducer<QueueMessage>>,
}

impl EventQueue for MemoryQueue {
    async fn publish(&self, event_type: &str, payload: serde_json::Value) -> Result<(), QueueError> {
        let queue = queue_for_event(event_type).ok_or_else(|| QueueError::NoRoute(event_type.to_string()))?;
        let producer = match queue {
            PAYMENT_EVENTS_QUEUE => self.payment_events.as_ref(),
            PLEDGE_EVENTS_QUEUE => self.pledge_events.as_ref(),
            _ => None,
        };
        match producer {
            Some(producer) => {
                trace!("📬️ Publishing {event_type} to {queue}");
                producer
                    .publish(QueueMessage::new(event_type, payload))
                    .await
                    .map_err(QueueError::PublishFailed)
            },
            None => {
                // No consumer registered for this queue in this process. That is a wiring choice,
                // not an error; the event is simply not consumed here.
                debug!("📬️ No consumer registered for {queue}, dropping {event_type}");
                Ok(())
            },
        }
    }
}
