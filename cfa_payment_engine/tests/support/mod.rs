//! Shared setup for the integration tests.
#![allow(dead_code)]

use cfa_common::Money;
use cfa_payment_engine::{
    db_types::{NewPledge, Payment, Pledge},
    test_utils::{prepare_test_env, random_db_path, MockGateway},
    traits::PaymentGatewayDatabase,
    PaymentFlowApi,
    PaymentInitiation,
    RedirectUrls,
    SqliteDatabase,
};

pub async fn new_test_db() -> SqliteDatabase {
    new_test_db_with_connections(5).await
}

/// A single-connection database serialises writers completely, which keeps race tests
/// deterministic: the loser always observes the winner's commit instead of a busy error.
pub async fn new_test_db_with_connections(max_connections: u32) -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, max_connections).await.expect("Error creating test database")
}

pub fn redirect_urls() -> RedirectUrls {
    RedirectUrls::from_base("https://careforall.test")
}

pub async fn seed_pledge(db: &SqliteDatabase, amount_taka: i64) -> Pledge {
    seed_pledge_for(db, "campaign-1", Some("user-1"), amount_taka).await
}

pub async fn seed_pledge_for(
    db: &SqliteDatabase,
    campaign_id: &str,
    user_id: Option<&str>,
    amount_taka: i64,
) -> Pledge {
    let mut pledge = NewPledge::new(campaign_id, user_id.map(String::from), Money::from_taka(amount_taka));
    pledge.donor_name = Some("Ayesha Rahman".to_string());
    pledge.donor_email = Some("ayesha@example.com".to_string());
    db.insert_pledge(pledge).await.expect("Error seeding pledge")
}

/// Seeds a pledge and runs a full initiation against the mock gateway, returning the pending
/// payment.
pub async fn seed_initiated_payment(db: &SqliteDatabase, gateway: &MockGateway, amount_taka: i64) -> Payment {
    let pledge = seed_pledge(db, amount_taka).await;
    initiate(db, gateway, &pledge).await.payment
}

pub async fn initiate(db: &SqliteDatabase, gateway: &MockGateway, pledge: &Pledge) -> PaymentInitiation {
    let api = PaymentFlowApi::new(db.clone(), gateway.clone());
    api.initiate_payment(&pledge.id, &redirect_urls()).await.expect("Error initiating payment")
}

pub async fn fetch_payment(db: &SqliteDatabase, payment: &Payment) -> Payment {
    db.fetch_payment(&payment.id).await.expect("Error fetching payment").expect("Payment is gone")
}
