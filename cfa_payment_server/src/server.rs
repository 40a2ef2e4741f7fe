use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use cfa_payment_engine::{IdempotencyGuard, PaymentFlowApi, RedirectUrls, SqliteDatabase, WebhookApi};
use log::*;

use crate::{
    auth::TokenIssuer,
    config::ServerConfig,
    errors::ServerError,
    integrations::SslCommerzClient,
    routes::{
        get_payment,
        get_payment_by_transaction,
        get_payment_for_pledge,
        health,
        initiate_payment,
        refund_payment,
        validate_payment,
        webhook_cancel,
        webhook_fail,
        webhook_ipn,
        webhook_success,
    },
    workers::spawn_event_pipeline,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    spawn_event_pipeline(db.clone(), config.outbox.clone());
    let srv = create_server_instance(config, db)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, db: SqliteDatabase) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let gateway = SslCommerzClient::new(config.gateway.clone());
        let flow_api = PaymentFlowApi::new(db.clone(), gateway.clone());
        let webhook_api =
            WebhookApi::new(db.clone(), gateway).with_validate_timeout(config.gateway_validate_timeout);
        let guard = IdempotencyGuard::with_ttl(db.clone(), chrono::Duration::hours(config.idempotency_ttl_hours));
        let issuer = TokenIssuer::new(&config.auth);
        let urls = RedirectUrls::from_base(&config.public_base_url);
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("cfa::access_log"))
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(webhook_api))
            .app_data(web::Data::new(guard))
            .app_data(web::Data::new(issuer))
            .app_data(web::Data::new(urls));
        // Routes that require authentication. Enforcement sits in the JwtClaims extractor.
        let api_scope = web::scope("/api")
            .service(initiate_payment)
            .service(get_payment)
            .service(get_payment_for_pledge)
            .service(get_payment_by_transaction)
            .service(validate_payment)
            .service(refund_payment);
        // The gateway callbacks. Unauthenticated by design; the IPN channel authenticates its
        // deliveries against the gateway itself.
        let webhook_scope = web::scope("/payments/webhook")
            .service(webhook_success)
            .service(webhook_fail)
            .service(webhook_cancel)
            .service(webhook_ipn);
        app.service(health).service(api_scope).service(webhook_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    info!("🚀️ Payment server instance created");
    Ok(srv)
}
