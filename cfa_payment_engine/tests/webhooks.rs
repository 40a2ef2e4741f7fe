//! The four reconciliation channels: dedup, ordering, validation and terminal outcomes.
mod support;

use cfa_payment_engine::{
    db_types::{PaymentStatus, TransitionExtra},
    test_utils::MockGateway,
    traits::PaymentGatewayDatabase,
    CallbackData,
    WebhookApi,
    WebhookOutcome,
};
use serde_json::json;
use support::{fetch_payment, new_test_db, seed_initiated_payment};

fn success_callback(transaction_id: &str, val_id: &str) -> CallbackData {
    CallbackData {
        transaction_id: transaction_id.to_string(),
        val_id: Some(val_id.to_string()),
        payment_method: Some("VISA".to_string()),
        status: Some("VALID".to_string()),
        error: None,
        raw: json!({"tran_id": transaction_id, "val_id": val_id, "card_type": "VISA", "status": "VALID"}),
    }
}

fn fail_callback(transaction_id: &str, error: &str) -> CallbackData {
    CallbackData {
        transaction_id: transaction_id.to_string(),
        val_id: None,
        payment_method: None,
        status: Some("FAILED".to_string()),
        error: Some(error.to_string()),
        raw: json!({"tran_id": transaction_id, "status": "FAILED", "error": error}),
    }
}

#[tokio::test]
async fn success_webhook_authorizes_a_pending_payment() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let outcome = api.process_success(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Authorized);
    assert_eq!(updated.payment_method.as_deref(), Some("VISA"));

    let log = db.fetch_webhook_log(&format!("success-{}-VAL-1", payment.transaction_id)).await.unwrap().unwrap();
    assert!(log.processed);
    assert_eq!(log.event_type, "success");
}

#[tokio::test]
async fn duplicate_success_webhook_is_absorbed_by_the_log() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let first = api.process_success(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    assert!(matches!(first, WebhookOutcome::Applied(_)));
    // Same delivery again: same val_id, same webhook id.
    let second = api.process_success(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    assert!(matches!(second, WebhookOutcome::Duplicate));
    assert_eq!(fetch_payment(&db, &payment).await.status, PaymentStatus::Authorized);
}

#[tokio::test]
async fn valid_ipn_drives_the_payment_to_completed() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let outcome = api.process_ipn(success_callback(&payment.transaction_id, "VAL-7")).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Completed);
    assert_eq!(gateway.validate_calls(), 1);

    // Every hop landed in the audit trail.
    let history = db.fetch_payment_history(&payment.id).await.unwrap();
    let hops: Vec<PaymentStatus> = history.iter().map(|h| h.to_status).collect();
    assert_eq!(hops, vec![PaymentStatus::Authorized, PaymentStatus::Captured, PaymentStatus::Completed]);
}

#[tokio::test]
async fn ipn_after_success_continues_from_authorized() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    api.process_success(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    let outcome = api.process_ipn(success_callback(&payment.transaction_id, "VAL-2")).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn unvalidated_ipn_is_rejected_and_touches_nothing() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    gateway.set_validation_status("INVALID");
    let api = WebhookApi::new(db.clone(), gateway.clone());

    // Anyone can POST to the IPN endpoint; a success-shaped delivery the gateway disowns must
    // not move the state machine.
    let outcome = api.process_ipn(success_callback(&payment.transaction_id, "VAL-FORGED")).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Rejected(_)));
    assert_eq!(gateway.validate_calls(), 1);

    let payment = fetch_payment(&db, &payment).await;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.error_message.is_none());
    assert!(db.fetch_payment_history(&payment.id).await.unwrap().is_empty());

    let log = db
        .fetch_webhook_log(&format!("ipn-{}-VAL-FORGED", payment.transaction_id))
        .await
        .unwrap()
        .unwrap();
    assert!(!log.processed);
    assert!(log.error_message.unwrap().contains("validation failed"));
}

#[tokio::test]
async fn failure_ipn_fails_the_payment_without_gateway_validation() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let outcome = api.process_ipn(fail_callback(&payment.transaction_id, "Insufficient funds")).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Failed);
    assert_eq!(updated.error_message.as_deref(), Some("Insufficient funds"));
    // No val_id, nothing to validate.
    assert_eq!(gateway.validate_calls(), 0);
}

#[tokio::test]
async fn ipn_without_validation_id_is_rejected() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let mut callback = fail_callback(&payment.transaction_id, "whatever");
    callback.status = None;
    let outcome = api.process_ipn(callback).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Rejected(_)));
    assert_eq!(gateway.validate_calls(), 0);
    assert_eq!(fetch_payment(&db, &payment).await.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn fail_webhook_fails_the_payment_with_the_gateway_error() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let outcome = api.process_fail(fail_callback(&payment.transaction_id, "Insufficient funds")).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Failed);
    assert_eq!(updated.error_message.as_deref(), Some("Insufficient funds"));
}

#[tokio::test]
async fn cancel_webhook_collapses_onto_failed() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let mut callback = fail_callback(&payment.transaction_id, "Cancelled by user");
    callback.status = Some("CANCELLED".to_string());
    let outcome = api.process_cancel(callback).await.unwrap();
    let WebhookOutcome::Applied(updated) = outcome else { panic!("expected Applied, got {outcome:?}") };
    assert_eq!(updated.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn late_fail_webhook_cannot_undo_a_completed_payment() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    api.process_ipn(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    assert_eq!(fetch_payment(&db, &payment).await.status, PaymentStatus::Completed);

    // A stale failure delivery arrives afterwards; the state machine refuses it and the
    // reconciler absorbs it.
    let outcome = api.process_fail(fail_callback(&payment.transaction_id, "stale")).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::OutOfOrder(_)));
    assert_eq!(fetch_payment(&db, &payment).await.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn webhook_for_unknown_transaction_is_rejected_and_logged() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let api = WebhookApi::new(db.clone(), gateway.clone());

    let outcome = api.process_success(success_callback("CFA-0-deadbeef", "VAL-1")).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Rejected(_)));
    let log = db.fetch_webhook_log("success-CFA-0-deadbeef-VAL-1").await.unwrap().unwrap();
    assert!(!log.processed);
    assert!(log.error_message.unwrap().contains("No payment found"));
}

#[tokio::test]
async fn redelivered_completion_after_refund_is_absorbed() {
    let db = new_test_db().await;
    let gateway = MockGateway::new();
    let payment = seed_initiated_payment(&db, &gateway, 500).await;
    let api = WebhookApi::new(db.clone(), gateway.clone());

    api.process_ipn(success_callback(&payment.transaction_id, "VAL-1")).await.unwrap();
    db.transition_payment(&payment.id, PaymentStatus::Refunded, TransitionExtra::default(), Some("refund"))
        .await
        .unwrap();

    // The gateway redelivers the IPN with a fresh val_id; the payment is already refunded.
    let outcome = api.process_ipn(success_callback(&payment.transaction_id, "VAL-2")).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::OutOfOrder(_)));
    assert_eq!(fetch_payment(&db, &payment).await.status, PaymentStatus::Refunded);
}
