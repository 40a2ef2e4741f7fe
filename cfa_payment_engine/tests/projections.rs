//! The projectors: pledge settlement and read-model increments, exactly once under redelivery.
mod support;

use cfa_common::Money;
use cfa_payment_engine::{
    db_types::{PledgeStatus, PaymentStatus, TransitionExtra},
    events::{event_types, PaymentEventPayload, PledgeEventPayload, QueueMessage},
    test_utils::MockGateway,
    traits::PaymentGatewayDatabase,
    PledgeProjector,
    ReadModelProjector,
};
use support::{new_test_db, seed_initiated_payment, seed_pledge_for};

fn payment_completed_message(payment: &cfa_payment_engine::db_types::Payment) -> QueueMessage {
    let payload = serde_json::to_value(PaymentEventPayload::from(payment)).unwrap();
    QueueMessage::new(event_types::PAYMENT_COMPLETED, payload)
}

fn pledge_completed_message(pledge: &cfa_payment_engine::db_types::Pledge) -> QueueMessage {
    let payload = serde_json::to_value(PledgeEventPayload::from(pledge)).unwrap();
    QueueMessage::new(event_types::PLEDGE_COMPLETED, payload)
}

#[tokio::test]
async fn payment_completed_completes_the_pledge_once() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let payment = db
        .transition_payment(&payment.id, PaymentStatus::Authorized, TransitionExtra::default(), None)
        .await
        .unwrap();
    let payment =
        db.transition_payment(&payment.id, PaymentStatus::Captured, TransitionExtra::default(), None).await.unwrap();
    let payment =
        db.transition_payment(&payment.id, PaymentStatus::Completed, TransitionExtra::default(), None).await.unwrap();

    let projector = PledgeProjector::new(db.clone());
    projector.handle(payment_completed_message(&payment)).await.unwrap();

    let pledge = db.fetch_pledge(&payment.pledge_id).await.unwrap().unwrap();
    assert_eq!(pledge.status, PledgeStatus::Completed);
    assert_eq!(pledge.payment_reference.as_deref(), Some(payment.transaction_id.as_str()));
    let events = db.fetch_outbox_for_aggregate(pledge.id.as_str()).await.unwrap();
    let completions = events.iter().filter(|e| e.event_type == event_types::PLEDGE_COMPLETED).count();
    assert_eq!(completions, 1);

    // Redelivery: no second pledge.completed event.
    projector.handle(payment_completed_message(&payment)).await.unwrap();
    let events = db.fetch_outbox_for_aggregate(pledge.id.as_str()).await.unwrap();
    let completions = events.iter().filter(|e| e.event_type == event_types::PLEDGE_COMPLETED).count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn payment_failed_finalizes_the_pledge() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let payment = db
        .transition_payment(&payment.id, PaymentStatus::Failed, TransitionExtra::default(), Some("declined"))
        .await
        .unwrap();

    let projector = PledgeProjector::new(db.clone());
    let payload = serde_json::to_value(PaymentEventPayload::from(&payment)).unwrap();
    projector.handle(QueueMessage::new(event_types::PAYMENT_FAILED, payload)).await.unwrap();

    let pledge = db.fetch_pledge(&payment.pledge_id).await.unwrap().unwrap();
    assert_eq!(pledge.status, PledgeStatus::Failed);
}

#[tokio::test]
async fn settlement_increments_the_read_models_exactly_once() {
    let db = new_test_db().await;
    let pledge = seed_pledge_for(&db, "campaign-7", Some("user-9"), 500).await;
    let projector = ReadModelProjector::new(db.clone());

    let created = serde_json::to_value(PledgeEventPayload::from(&pledge)).unwrap();
    projector.handle(QueueMessage::new(event_types::PLEDGE_CREATED, created)).await.unwrap();
    let donation = db.fetch_donation(&pledge.id).await.unwrap().unwrap();
    assert!(!donation.settled);
    assert!(db.fetch_campaign_totals("campaign-7").await.unwrap().is_none());

    projector.handle(pledge_completed_message(&pledge)).await.unwrap();
    let totals = db.fetch_campaign_totals("campaign-7").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(500));
    assert_eq!(totals.donor_count, 1);
    let stats = db.fetch_user_statistics("user-9").await.unwrap().unwrap();
    assert_eq!(stats.total_donated, Money::from_taka(500));
    assert_eq!(stats.donation_count, 1);
    assert_eq!(stats.campaigns_supported, 1);
    let platform = db.fetch_platform_statistics().await.unwrap();
    assert_eq!(platform.total_raised, Money::from_taka(500));
    assert_eq!(platform.total_donations, 1);

    // Redeliver the completion three times; nothing moves.
    for _ in 0..3 {
        projector.handle(pledge_completed_message(&pledge)).await.unwrap();
    }
    let totals = db.fetch_campaign_totals("campaign-7").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(500));
    assert_eq!(totals.donor_count, 1);
    let platform = db.fetch_platform_statistics().await.unwrap();
    assert_eq!(platform.total_raised, Money::from_taka(500));
    assert_eq!(platform.total_donations, 1);
}

#[tokio::test]
async fn settlement_without_a_prior_created_event_still_counts() {
    // The completion can overtake the creation event under at-least-once delivery; settlement
    // inserts the donation row itself when it is missing.
    let db = new_test_db().await;
    let pledge = seed_pledge_for(&db, "campaign-3", Some("user-2"), 250).await;
    let projector = ReadModelProjector::new(db.clone());

    projector.handle(pledge_completed_message(&pledge)).await.unwrap();
    let donation = db.fetch_donation(&pledge.id).await.unwrap().unwrap();
    assert!(donation.settled);
    let totals = db.fetch_campaign_totals("campaign-3").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(250));
}

#[tokio::test]
async fn two_donations_to_one_campaign_support_it_once() {
    let db = new_test_db().await;
    let first = seed_pledge_for(&db, "campaign-1", Some("user-5"), 100).await;
    let second = seed_pledge_for(&db, "campaign-1", Some("user-5"), 300).await;
    let projector = ReadModelProjector::new(db.clone());

    projector.handle(pledge_completed_message(&first)).await.unwrap();
    projector.handle(pledge_completed_message(&second)).await.unwrap();

    let stats = db.fetch_user_statistics("user-5").await.unwrap().unwrap();
    assert_eq!(stats.total_donated, Money::from_taka(400));
    assert_eq!(stats.donation_count, 2);
    assert_eq!(stats.campaigns_supported, 1);
    let totals = db.fetch_campaign_totals("campaign-1").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(400));
}

#[tokio::test]
async fn anonymous_donations_skip_user_statistics() {
    let db = new_test_db().await;
    let pledge = seed_pledge_for(&db, "campaign-2", None, 150).await;
    let projector = ReadModelProjector::new(db.clone());

    projector.handle(pledge_completed_message(&pledge)).await.unwrap();
    let totals = db.fetch_campaign_totals("campaign-2").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(150));
    let platform = db.fetch_platform_statistics().await.unwrap();
    assert_eq!(platform.total_donations, 1);
}

#[tokio::test]
async fn cancelled_pledges_drop_their_unsettled_donation() {
    let db = new_test_db().await;
    let pledge = seed_pledge_for(&db, "campaign-4", Some("user-1"), 200).await;
    let projector = ReadModelProjector::new(db.clone());

    let created = serde_json::to_value(PledgeEventPayload::from(&pledge)).unwrap();
    projector.handle(QueueMessage::new(event_types::PLEDGE_CREATED, created)).await.unwrap();
    let cancelled = serde_json::to_value(PledgeEventPayload::from(&pledge)).unwrap();
    projector.handle(QueueMessage::new(event_types::PLEDGE_CANCELLED, cancelled)).await.unwrap();

    assert!(db.fetch_donation(&pledge.id).await.unwrap().is_none());
}
