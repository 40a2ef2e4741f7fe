//! Background machinery: the outbox relay and the in-process queue consumers.

use cfa_payment_engine::{
    events::{QueueConsumers, QueueHooks},
    OutboxRelay,
    PledgeProjector,
    ReadModelProjector,
    RelayConfig,
    SqliteDatabase,
};
use log::*;

const QUEUE_BUFFER_SIZE: usize = 100;

/// Wires the projectors to the in-process queue and spawns the outbox relay loop.
///
/// Call once per process, not per HTTP worker: the relay polls the database and must not be
/// multiplied.
pub fn spawn_event_pipeline(db: SqliteDatabase, relay_config: RelayConfig) {
    let pledge_projector = PledgeProjector::new(db.clone());
    let read_projector = ReadModelProjector::new(db.clone());
    let hooks = QueueHooks::default()
        .on_payment_event(move |msg| {
            let projector = pledge_projector.clone();
            Box::pin(async move {
                if let Err(e) = projector.handle(msg).await {
                    error!("🪢️ Pledge projector error: {e}");
                }
            })
        })
        .on_pledge_event(move |msg| {
            let projector = read_projector.clone();
            Box::pin(async move {
                if let Err(e) = projector.handle(msg).await {
                    error!("📊️ Read model projector error: {e}");
                }
            })
        });
    let consumers = QueueConsumers::new(QUEUE_BUFFER_SIZE, hooks);
    let queue = consumers.queue();
    consumers.start();
    let relay = OutboxRelay::new(db, queue, relay_config);
    tokio::spawn(relay.run());
    info!("🚀️ Event pipeline started");
}
