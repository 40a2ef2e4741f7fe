use std::time::Duration;

use log::*;

use crate::{
    events::EventQueue,
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_retries: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5), batch_size: 100, max_retries: 3 }
    }
}

/// Polls the outbox and republishes committed events onto the queue substrate.
///
/// Marking a row processed happens *after* a successful publish, so a crash between the two
/// republishes the event on the next poll. That makes delivery at-least-once, which the
/// downstream projectors are built for.
pub struct OutboxRelay<B, Q> {
    db: B,
    queue: Q,
    config: RelayConfig,
}

impl<B, Q> OutboxRelay<B, Q>
where
    B: PaymentGatewayDatabase,
    Q: EventQueue,
{
    pub fn new(db: B, queue: Q, config: RelayConfig) -> Self {
        Self { db, queue, config }
    }

    /// Processes one batch. Returns the number of rows successfully published.
    pub async fn process_batch(&self) -> Result<usize, PaymentGatewayError> {
        let batch = self.db.fetch_unprocessed_outbox(self.config.batch_size, self.config.max_retries).await?;
        if batch.is_empty() {
            return Ok(0);
        }
        trace!("📤️ Relaying {} outbox event(s)", batch.len());
        let mut published = 0;
        for event in batch {
            let payload = match event.payload_json() {
                Ok(payload) => payload,
                Err(e) => {
                    // A row we wrote ourselves should never be unparseable; park it via the
                    // ordinary retry bookkeeping and move on.
                    error!("📤️ Outbox row {} has an unparseable payload: {e}", event.id);
                    self.db.record_outbox_failure(event.id, &format!("unparseable payload: {e}")).await?;
                    continue;
                },
            };
            match self.queue.publish(&event.event_type, payload).await {
                Ok(()) => {
                    self.db.mark_outbox_processed(event.id).await?;
                    published += 1;
                },
                Err(e) => {
                    debug!("📤️ Publish of outbox row {} failed (attempt {}): {e}", event.id, event.retry_count + 1);
                    self.db.record_outbox_failure(event.id, &e.to_string()).await?;
                },
            }
        }
        let parked = self.db.count_parked_outbox(self.config.max_retries).await?;
        if parked > 0 {
            warn!("📤️ {parked} outbox event(s) have exhausted their retries and need operator attention");
        }
        Ok(published)
    }

    /// Runs the poll loop until the task is aborted.
    pub async fn run(self) {
        info!(
            "📤️ Outbox relay started (every {:?}, batches of {}, {} retries)",
            self.config.poll_interval, self.config.batch_size, self.config.max_retries
        );
        loop {
            if let Err(e) = self.process_batch().await {
                error!("📤️ Outbox poll failed: {e}");
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
