//! Bounded fan-in channel with a single handler per queue.
//!
//! Producers are cheap clones of a sender handle; the consumer side owns the receiver and runs
//! one handler function per message. Handlers run as spawned tasks so a slow message never
//! blocks the queue, and the consumer loop drains its in-flight tasks before shutting down.

use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The consuming half of a queue: a bounded inbox plus the handler that processes it.
pub struct EventHandler<E: Send + Sync + 'static> {
    inbox: mpsc::Receiver<E>,
    inlet: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (inlet, inbox) = mpsc::channel(buffer_size);
        Self { inbox, inlet, handler }
    }

    /// A new producer handle for this queue. Handles may outlive each other; the queue stays
    /// open as long as any of them does.
    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer { sender: self.inlet.clone() }
    }

    /// Consumes messages until every producer handle is dropped, then waits for the handlers
    /// still in flight.
    pub async fn start_handler(mut self) {
        debug!("📬️ Event handler running");
        // Our own inlet must go, or the recv loop never ends.
        drop(self.inlet);
        let mut in_flight = JoinSet::new();
        while let Some(msg) = self.inbox.recv().await {
            let handler = Arc::clone(&self.handler);
            in_flight.spawn(async move { (handler)(msg).await });
        }
        debug!("📬️ Inbox closed, draining {} in-flight handler(s)", in_flight.len());
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("📬️ A message handler panicked: {e}");
            }
        }
        debug!("📬️ Event handler stopped");
    }
}

/// A clonable handle for pushing messages onto a queue.
#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub async fn publish(&self, message: E) -> Result<(), String> {
        match self.sender.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("📬️ The consumer side of the queue is gone: {e}");
                Err(e.to_string())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn summing_handler(total: Arc<AtomicU64>) -> Handler<u64> {
        Arc::new(move |v: u64| {
            let total = total.clone();
            Box::pin(async move {
                total.fetch_add(v, Ordering::SeqCst);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        })
    }

    #[tokio::test]
    async fn every_published_message_is_handled_before_shutdown() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicU64::new(0));
        let consumer = EventHandler::new(4, summing_handler(total.clone()));
        let producer = consumer.subscribe();
        let extra = producer.clone();
        tokio::spawn(async move {
            for i in 1..=10u64 {
                producer.publish(i).await.unwrap();
            }
            extra.publish(100).await.unwrap();
        });
        // Returns only after both producer handles are dropped and all handlers finished.
        consumer.start_handler().await;
        assert_eq!(total.load(Ordering::SeqCst), 155);
    }

    #[tokio::test]
    async fn publishing_to_a_dead_consumer_is_an_error() {
        let total = Arc::new(AtomicU64::new(0));
        let consumer = EventHandler::new(4, summing_handler(total));
        let producer = consumer.subscribe();
        drop(consumer);
        assert!(producer.publish(1).await.is_err());
    }
}
