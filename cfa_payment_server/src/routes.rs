//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use cfa_payment_engine::{
    db_types::{PaymentId, PledgeId},
    traits::PaymentGatewayDatabase,
    CallbackData,
    IdempotencyGuard,
    PaymentFlowApi,
    RedirectUrls,
    SqliteDatabase,
    WebhookApi,
    WebhookOutcome,
};
use log::*;
use serde_json::json;

use crate::{
    auth::JwtClaims,
    data_objects::{GatewayCallback, InitiatePaymentRequest, JsonResponse, RefundRequest},
    errors::ServerError,
    integrations::SslCommerzClient,
};

/// The concrete API types the server wires up.
pub type FlowApi = PaymentFlowApi<SqliteDatabase, SslCommerzClient>;
pub type Webhooks = WebhookApi<SqliteDatabase, SslCommerzClient>;
pub type Guard = IdempotencyGuard<SqliteDatabase>;

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

//----------------------------------- payment flow ----------------------------------------------

/// POST /api/payments/initiate
///
/// Kicks off a payment for a pending pledge and returns the gateway redirect URL. The
/// `X-Idempotency-Key` header is mandatory: retries with the same key replay the stored response
/// instead of opening a second gateway session.
#[post("/payments/initiate")]
pub async fn initiate_payment(
    req: HttpRequest,
    claims: Option<JwtClaims>,
    api: web::Data<FlowApi>,
    guard: web::Data<Guard>,
    urls: web::Data<RedirectUrls>,
    body: web::Json<InitiatePaymentRequest>,
) -> Result<HttpResponse, ServerError> {
    let pledge_id = PledgeId::from(body.pledge_id.clone());
    authorize_initiation(&api, claims.as_ref(), &pledge_id).await?;
    let key = req
        .headers()
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| ServerError::InvalidRequestBody("The X-Idempotency-Key header is required".to_string()))?;
    let urls = urls.with_overrides(body.success_url.clone(), body.fail_url.clone(), body.cancel_url.clone());
    let caller = claims.map(|c| c.sub).unwrap_or_else(|| "an anonymous donor".to_string());
    debug!("💻️ Payment initiation for pledge {pledge_id} by {caller}");
    let request_body =
        serde_json::to_value(&*body).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    let response = guard
        .execute(&key, &request_body, || async {
            let initiation = api.initiate_payment(&pledge_id, &urls).await?;
            let body = serde_json::to_value(&initiation)
                .map_err(|e| cfa_payment_engine::traits::PaymentGatewayError::DatabaseError(e.to_string()))?;
            Ok((201, body))
        })
        .await?;
    let status = actix_web::http::StatusCode::from_u16(response.status as u16)
        .unwrap_or(actix_web::http::StatusCode::OK);
    Ok(HttpResponse::build(status).content_type("application/json").body(response.body))
}

/// GET /api/payments/{id}
#[get("/payments/{id}")]
pub async fn get_payment(
    claims: JwtClaims,
    api: web::Data<FlowApi>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let id = PaymentId::from(path.into_inner());
    let payment = api
        .fetch_payment(&id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment {id} not found")))?;
    authorize_pledge_access(&api, &claims, &payment.pledge_id).await?;
    Ok(HttpResponse::Ok().json(payment))
}

/// GET /api/payments/pledge/{pledge_id}
#[get("/payments/pledge/{pledge_id}")]
pub async fn get_payment_for_pledge(
    claims: JwtClaims,
    api: web::Data<FlowApi>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let pledge_id = PledgeId::from(path.into_inner());
    authorize_pledge_access(&api, &claims, &pledge_id).await?;
    let payment = api
        .fetch_payment_for_pledge(&pledge_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("No payment for pledge {pledge_id}")))?;
    Ok(HttpResponse::Ok().json(payment))
}

/// GET /api/payments/transaction/{txid}
#[get("/payments/transaction/{txid}")]
pub async fn get_payment_by_transaction(
    claims: JwtClaims,
    api: web::Data<FlowApi>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let txid = path.into_inner();
    let payment = api
        .fetch_payment_by_transaction_id(&txid)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("No payment with transaction id {txid}")))?;
    authorize_pledge_access(&api, &claims, &payment.pledge_id).await?;
    Ok(HttpResponse::Ok().json(payment))
}

/// POST /api/payments/{id}/validate. Manual reconciliation escape hatch: asks the gateway for its
/// view of the transaction.
#[post("/payments/{id}/validate")]
pub async fn validate_payment(
    claims: JwtClaims,
    api: web::Data<FlowApi>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let id = PaymentId::from(path.into_inner());
    let payment = api
        .fetch_payment(&id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment {id} not found")))?;
    authorize_pledge_access(&api, &claims, &payment.pledge_id).await?;
    let validation = api.validate_with_gateway(&id).await?;
    Ok(HttpResponse::Ok().json(json!({"status": validation.status, "gateway_response": validation.raw})))
}

/// POST /api/payments/{id}/refund. Admin only.
#[post("/payments/{id}/refund")]
pub async fn refund_payment(
    claims: JwtClaims,
    api: web::Data<FlowApi>,
    path: web::Path<String>,
    body: web::Json<RefundRequest>,
) -> Result<HttpResponse, ServerError> {
    claims.require_admin()?;
    let id = PaymentId::from(path.into_inner());
    info!("💻️ Refund of payment {id} requested by {}", claims.sub);
    let payment = api.refund(&id, &body.reason).await?;
    Ok(HttpResponse::Ok().json(payment))
}

/// Anonymous pledges are open: donating without an account is the product's whole point, so
/// no token is needed to kick their payment off. Owned pledges need the owner (or an admin).
async fn authorize_initiation(
    api: &web::Data<FlowApi>,
    claims: Option<&JwtClaims>,
    pledge_id: &PledgeId,
) -> Result<(), ServerError> {
    let pledge = api
        .fetch_pledge(pledge_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Pledge {pledge_id} not found")))?;
    let Some(owner) = pledge.user_id.as_deref() else { return Ok(()) };
    let claims = claims.ok_or(crate::errors::AuthError::MissingToken)?;
    if !claims.may_access(Some(owner)) {
        return Err(crate::errors::AuthError::InsufficientPermissions(format!(
            "Pledge {pledge_id} does not belong to you"
        ))
        .into());
    }
    Ok(())
}

async fn authorize_pledge_access(
    api: &web::Data<FlowApi>,
    claims: &JwtClaims,
    pledge_id: &PledgeId,
) -> Result<(), ServerError> {
    let pledge = api
        .fetch_pledge(pledge_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Pledge {pledge_id} not found")))?;
    if !claims.may_access(pledge.user_id.as_deref()) {
        return Err(crate::errors::AuthError::InsufficientPermissions(format!(
            "Pledge {pledge_id} does not belong to you"
        ))
        .into());
    }
    Ok(())
}

//----------------------------------- webhooks --------------------------------------------------

// The gateway treats any non-200 as "retry later", so these endpoints always answer 200 with a
// success flag, whatever happened inside. Failures still land in the webhook log.

#[post("/success")]
pub async fn webhook_success(
    hooks: web::Data<Webhooks>,
    body: web::Form<GatewayCallback>,
) -> Result<HttpResponse, ServerError> {
    let data = CallbackData::from(body.into_inner());
    let outcome = hooks.process_success(data).await;
    Ok(webhook_response("success", outcome))
}

#[post("/fail")]
pub async fn webhook_fail(
    hooks: web::Data<Webhooks>,
    body: web::Form<GatewayCallback>,
) -> Result<HttpResponse, ServerError> {
    let data = CallbackData::from(body.into_inner());
    let outcome = hooks.process_fail(data).await;
    Ok(webhook_response("fail", outcome))
}

#[post("/cancel")]
pub async fn webhook_cancel(
    hooks: web::Data<Webhooks>,
    body: web::Form<GatewayCallback>,
) -> Result<HttpResponse, ServerError> {
    let data = CallbackData::from(body.into_inner());
    let outcome = hooks.process_cancel(data).await;
    Ok(webhook_response("cancel", outcome))
}

#[post("/ipn")]
pub async fn webhook_ipn(
    hooks: web::Data<Webhooks>,
    body: web::Form<GatewayCallback>,
) -> Result<HttpResponse, ServerError> {
    let data = CallbackData::from(body.into_inner());
    let outcome = hooks.process_ipn(data).await;
    Ok(webhook_response("ipn", outcome))
}

fn webhook_response(
    channel: &str,
    outcome: Result<WebhookOutcome, cfa_payment_engine::traits::PaymentGatewayError>,
) -> HttpResponse {
    let body = match outcome {
        Ok(outcome @ (WebhookOutcome::Applied(_) | WebhookOutcome::Duplicate | WebhookOutcome::OutOfOrder(_))) => {
            JsonResponse::ok(outcome.message())
        },
        Ok(outcome @ WebhookOutcome::Rejected(_)) => JsonResponse::failure(outcome.message()),
        Err(e) => {
            error!("📨️ Error processing {channel} webhook: {e}");
            JsonResponse::failure(format!("Webhook processing failed: {e}"))
        },
    };
    HttpResponse::Ok().json(body)
}
