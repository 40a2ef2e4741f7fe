//! The whole pipeline wired together: initiation, webhooks, relay, queue consumers, projectors.
mod support;

use std::time::Duration;

use cfa_common::Money;
use cfa_payment_engine::{
    db_types::{PaymentStatus, PledgeStatus},
    events::{QueueConsumers, QueueHooks},
    test_utils::MockGateway,
    traits::PaymentGatewayDatabase,
    OutboxRelay,
    PaymentFlowApi,
    PledgeProjector,
    ReadModelProjector,
    RelayConfig,
    SqliteDatabase,
    WebhookApi,
    WebhookOutcome,
};
use serde_json::json;
use support::{initiate, new_test_db, seed_pledge_for};

/// Wires the in-process queue to both projectors and returns a running relay's components.
fn wire_consumers(db: &SqliteDatabase) -> cfa_payment_engine::events::MemoryQueue {
    let pledge_projector = PledgeProjector::new(db.clone());
    let read_projector = ReadModelProjector::new(db.clone());
    let hooks = QueueHooks::default()
        .on_payment_event(move |msg| {
            let projector = pledge_projector.clone();
            Box::pin(async move {
                if let Err(e) = projector.handle(msg).await {
                    panic!("pledge projector failed: {e}");
                }
            })
        })
        .on_pledge_event(move |msg| {
            let projector = read_projector.clone();
            Box::pin(async move {
                if let Err(e) = projector.handle(msg).await {
                    panic!("read model projector failed: {e}");
                }
            })
        });
    let consumers = QueueConsumers::new(25, hooks);
    let queue = consumers.queue();
    consumers.start();
    queue
}

/// Polls the relay and a condition until the condition holds or two seconds pass. The relay is
/// driven manually so the test controls time.
async fn drain_until<F, Fut>(
    relay: &OutboxRelay<SqliteDatabase, cfa_payment_engine::events::MemoryQueue>,
    condition: F,
) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        relay.process_batch().await.expect("relay poll failed");
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn donation_happy_path_settles_everything() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let queue = wire_consumers(&db);
    let relay = OutboxRelay::new(db.clone(), queue, RelayConfig::default());

    // A donor pledges 500 BDT and is sent to the gateway.
    let pledge = seed_pledge_for(&db, "clean-water", Some("donor-42"), 500).await;
    let initiation = initiate(&db, &gateway, &pledge).await;
    let txid = initiation.payment.transaction_id.clone();

    // The gateway reports success on both channels, in the usual order.
    let webhooks = WebhookApi::new(db.clone(), gateway.clone());
    let success = cfa_payment_engine::CallbackData {
        transaction_id: txid.clone(),
        val_id: Some("VAL-100".to_string()),
        payment_method: Some("bKash".to_string()),
        status: Some("VALID".to_string()),
        error: None,
        raw: json!({"tran_id": txid, "val_id": "VAL-100", "card_type": "bKash", "bank_tran_id": "BANK-100"}),
    };
    let outcome = webhooks.process_success(success.clone()).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied(_)));
    let outcome = webhooks.process_ipn(success).await.unwrap();
    let WebhookOutcome::Applied(payment) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(payment.status, PaymentStatus::Completed);

    // The relay pushes payment.completed to the pledge projector, whose pledge.completed then
    // reaches the read model projector on a later poll.
    let settled = drain_until(&relay, || async {
        db.fetch_campaign_totals("clean-water").await.unwrap().map(|t| t.donor_count == 1).unwrap_or(false)
    })
    .await;
    assert!(settled, "read models were never settled");

    let pledge = db.fetch_pledge(&pledge.id).await.unwrap().unwrap();
    assert_eq!(pledge.status, PledgeStatus::Completed);
    assert_eq!(pledge.payment_reference.as_deref(), Some(txid.as_str()));

    let totals = db.fetch_campaign_totals("clean-water").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(500));
    let stats = db.fetch_user_statistics("donor-42").await.unwrap().unwrap();
    assert_eq!(stats.total_donated, Money::from_taka(500));
    let platform = db.fetch_platform_statistics().await.unwrap();
    assert_eq!(platform.total_raised, Money::from_taka(500));
    assert_eq!(platform.total_donations, 1);
}

#[tokio::test]
async fn failed_donation_never_touches_the_read_models() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let queue = wire_consumers(&db);
    let relay = OutboxRelay::new(db.clone(), queue, RelayConfig::default());

    let pledge = seed_pledge_for(&db, "flood-relief", Some("donor-7"), 1000).await;
    let initiation = initiate(&db, &gateway, &pledge).await;

    let webhooks = WebhookApi::new(db.clone(), gateway.clone());
    let fail = cfa_payment_engine::CallbackData {
        transaction_id: initiation.payment.transaction_id.clone(),
        val_id: None,
        payment_method: None,
        status: Some("FAILED".to_string()),
        error: Some("Card declined".to_string()),
        raw: json!({"tran_id": initiation.payment.transaction_id, "status": "FAILED"}),
    };
    let outcome = webhooks.process_fail(fail).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied(_)));

    let finalized = drain_until(&relay, || async {
        db.fetch_pledge(&pledge.id).await.unwrap().map(|p| p.status == PledgeStatus::Failed).unwrap_or(false)
    })
    .await;
    assert!(finalized, "pledge was never finalized");

    assert!(db.fetch_campaign_totals("flood-relief").await.unwrap().is_none());
    let platform = db.fetch_platform_statistics().await.unwrap();
    assert_eq!(platform.total_donations, 0);
}

#[tokio::test]
async fn refund_unwinds_the_pledge_but_not_the_totals() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let queue = wire_consumers(&db);
    let relay = OutboxRelay::new(db.clone(), queue, RelayConfig::default());

    let pledge = seed_pledge_for(&db, "school-fund", Some("donor-3"), 750).await;
    let initiation = initiate(&db, &gateway, &pledge).await;
    let txid = initiation.payment.transaction_id.clone();

    let webhooks = WebhookApi::new(db.clone(), gateway.clone());
    let ipn = cfa_payment_engine::CallbackData {
        transaction_id: txid.clone(),
        val_id: Some("VAL-1".to_string()),
        payment_method: Some("VISA".to_string()),
        status: Some("VALID".to_string()),
        error: None,
        raw: json!({"tran_id": txid, "val_id": "VAL-1", "bank_tran_id": "BANK-1"}),
    };
    webhooks.process_ipn(ipn).await.unwrap();
    let settled = drain_until(&relay, || async {
        db.fetch_campaign_totals("school-fund").await.unwrap().is_some()
    })
    .await;
    assert!(settled);

    // An admin refunds the payment through the flow API.
    let api = PaymentFlowApi::new(db.clone(), gateway.clone());
    let payment = db.fetch_payment_by_pledge(&pledge.id).await.unwrap().unwrap();
    let refunded = api.refund(&payment.id, "Campaign cancelled").await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_reason.as_deref(), Some("Campaign cancelled"));
    assert_eq!(gateway.refund_calls(), 1);

    let unwound = drain_until(&relay, || async {
        db.fetch_pledge(&pledge.id).await.unwrap().map(|p| p.status == PledgeStatus::Refunded).unwrap_or(false)
    })
    .await;
    assert!(unwound, "pledge was never marked refunded");

    // Settled money stays in the aggregates; unwinding them is a reporting concern, not a
    // reconciliation one.
    let totals = db.fetch_campaign_totals("school-fund").await.unwrap().unwrap();
    assert_eq!(totals.raised_amount, Money::from_taka(750));
}
