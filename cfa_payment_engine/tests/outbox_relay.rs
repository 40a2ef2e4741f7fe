//! The outbox relay: publish-then-mark ordering, retry bookkeeping and parking.
mod support;

use cfa_payment_engine::{
    db_types::{NewOutboxEvent, PaymentStatus, PledgeId, TransitionExtra},
    events::event_types,
    test_utils::{MockGateway, RecordingQueue},
    traits::PaymentGatewayDatabase,
    OutboxRelay,
    RelayConfig,
};
use serde_json::json;
use support::{new_test_db, seed_initiated_payment};

fn relay_config() -> RelayConfig {
    RelayConfig { batch_size: 100, max_retries: 3, ..Default::default() }
}

#[tokio::test]
async fn committed_events_are_published_oldest_first() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let queue = RecordingQueue::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    db.transition_payment(&payment.id, PaymentStatus::Authorized, TransitionExtra::default(), None).await.unwrap();

    let relay = OutboxRelay::new(db.clone(), queue.clone(), relay_config());
    let published = relay.process_batch().await.unwrap();
    // pledge.created, pledge.payment_initiated, payment.authorized.
    assert_eq!(published, 3);
    assert_eq!(queue.event_types(), vec![
        event_types::PLEDGE_CREATED,
        event_types::PLEDGE_PAYMENT_INITIATED,
        event_types::PAYMENT_AUTHORIZED,
    ]);

    // Nothing left on the second poll.
    assert_eq!(relay.process_batch().await.unwrap(), 0);
    assert_eq!(queue.published().len(), 3);
}

#[tokio::test]
async fn failed_publishes_are_retried_on_the_next_poll() {
    let db = new_test_db().await;
    let queue = RecordingQueue::new();
    let pledge_id = PledgeId::random();
    db.append_outbox_event(NewOutboxEvent::pledge(&pledge_id, event_types::PLEDGE_COMPLETED, json!({"pledge_id": pledge_id.as_str()})))
        .await
        .unwrap();

    queue.fail_next(1);
    let relay = OutboxRelay::new(db.clone(), queue.clone(), relay_config());
    assert_eq!(relay.process_batch().await.unwrap(), 0);
    assert!(queue.published().is_empty());

    // The queue recovered; the same row goes out.
    assert_eq!(relay.process_batch().await.unwrap(), 1);
    assert_eq!(queue.event_types(), vec![event_types::PLEDGE_COMPLETED]);
}

#[tokio::test]
async fn rows_park_after_exhausting_the_retry_budget() {
    let db = new_test_db().await;
    let queue = RecordingQueue::new();
    let pledge_id = PledgeId::random();
    db.append_outbox_event(NewOutboxEvent::pledge(&pledge_id, event_types::PLEDGE_COMPLETED, json!({})))
        .await
        .unwrap();

    queue.fail_next(10);
    let config = RelayConfig { max_retries: 3, ..relay_config() };
    let relay = OutboxRelay::new(db.clone(), queue.clone(), config);
    for _ in 0..3 {
        assert_eq!(relay.process_batch().await.unwrap(), 0);
    }
    // Three failed attempts: the row is parked and no longer polled, even though the queue
    // would now accept it.
    assert_eq!(db.count_parked_outbox(3).await.unwrap(), 1);
    assert_eq!(relay.process_batch().await.unwrap(), 0);
    assert!(queue.published().is_empty());

    let rows = db.fetch_outbox_for_aggregate(pledge_id.as_str()).await.unwrap();
    assert_eq!(rows[0].retry_count, 3);
    assert!(!rows[0].processed);
    assert!(rows[0].last_error.as_deref().unwrap().contains("scripted publish failure"));
}

#[tokio::test]
async fn batch_size_bounds_each_poll() {
    let db = new_test_db().await;
    let queue = RecordingQueue::new();
    for i in 0..5 {
        let pledge_id = PledgeId::random();
        db.append_outbox_event(NewOutboxEvent::pledge(&pledge_id, event_types::PLEDGE_CREATED, json!({"n": i})))
            .await
            .unwrap();
    }
    let config = RelayConfig { batch_size: 2, ..relay_config() };
    let relay = OutboxRelay::new(db.clone(), queue.clone(), config);
    assert_eq!(relay.process_batch().await.unwrap(), 2);
    assert_eq!(relay.process_batch().await.unwrap(), 2);
    assert_eq!(relay.process_batch().await.unwrap(), 1);
    assert_eq!(queue.published().len(), 5);
}
