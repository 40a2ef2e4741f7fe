use cfa_common::Money;
use log::*;

use crate::{
    db_types::{PledgeId, PledgeStatus},
    events::{event_types, PaymentEventPayload, PledgeEventPayload, QueueMessage},
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

/// Consumes `payment.*` events and advances the pledge aggregate to match the payment outcome.
///
/// Every write it makes is guarded on the pledge's current status, so a redelivered event finds
/// nothing left to do.
#[derive(Clone)]
pub struct PledgeProjector<B> {
    db: B,
}

impl<B: PaymentGatewayDatabase> PledgeProjector<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn handle(&self, message: QueueMessage) -> Result<(), PaymentGatewayError> {
        match message.event_type.as_str() {
            event_types::PAYMENT_COMPLETED => {
                let payload: PaymentEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                match self.db.complete_pledge(&pledge_id, &payload.transaction_id).await? {
                    Some(_) => info!("🪢️ Pledge {pledge_id} completed by payment {}", payload.payment_id),
                    None => debug!("🪢️ Pledge {pledge_id} was already settled. Ignoring redelivery"),
                }
            },
            event_types::PAYMENT_FAILED => {
                let payload: PaymentEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                if self
                    .db
                    .finalize_pledge(&pledge_id, PledgeStatus::Failed, Some(&payload.transaction_id))
                    .await?
                    .is_none()
                {
                    debug!("🪢️ Pledge {pledge_id} was already settled. Ignoring redelivery");
                }
            },
            event_types::PAYMENT_REFUNDED => {
                let payload: PaymentEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                if self
                    .db
                    .finalize_pledge(&pledge_id, PledgeStatus::Refunded, Some(&payload.transaction_id))
                    .await?
                    .is_none()
                {
                    debug!("🪢️ Pledge {pledge_id} was already settled. Ignoring redelivery");
                }
            },
            // Intermediate hops and the attempt-over signal carry nothing for the pledge.
            other => trace!("🪢️ Ignoring {other}"),
        }
        Ok(())
    }
}

/// Consumes `pledge.*` events and maintains the denormalised read models.
///
/// Exactly-once effect comes from the settle flag on the donation row: the aggregates are only
/// incremented in the same transaction that flips it, and it only flips once.
#[derive(Clone)]
pub struct ReadModelProjector<B> {
    db: B,
}

impl<B: PaymentGatewayDatabase> ReadModelProjector<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn handle(&self, message: QueueMessage) -> Result<(), PaymentGatewayError> {
        match message.event_type.as_str() {
            event_types::PLEDGE_CREATED => {
                let payload: PledgeEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                self.record(&pledge_id, &payload.campaign_id, payload.user_id.as_deref(), payload.amount).await?;
            },
            event_types::PLEDGE_COMPLETED => {
                let payload: PledgeEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                let settled = self
                    .db
                    .settle_donation(&pledge_id, &payload.campaign_id, payload.user_id.as_deref(), payload.amount)
                    .await?;
                if settled {
                    info!("📊️ Donation for pledge {pledge_id} counted into the read models");
                } else {
                    debug!("📊️ Donation for pledge {pledge_id} was already counted. Ignoring redelivery");
                }
            },
            event_types::PLEDGE_CANCELLED => {
                let payload: PledgeEventPayload = serde_json::from_value(message.payload)?;
                let pledge_id = PledgeId::from(payload.pledge_id);
                self.db.remove_donation(&pledge_id).await?;
                debug!("📊️ Unsettled donation for pledge {pledge_id} removed");
            },
            other => trace!("📊️ Ignoring {other}"),
        }
        Ok(())
    }

    async fn record(
        &self,
        pledge_id: &PledgeId,
        campaign_id: &str,
        donor_id: Option<&str>,
        amount: Money,
    ) -> Result<(), PaymentGatewayError> {
        self.db.record_donation(pledge_id, campaign_id, donor_id, amount).await?;
        debug!("📊️ Donation recorded (unsettled) for pledge {pledge_id}");
        Ok(())
    }
}
