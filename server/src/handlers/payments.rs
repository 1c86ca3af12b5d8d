//! Payment endpoints
//!
//! The webhook route takes the raw body; no JSON extractor may run before
//! the signature is verified over the exact bytes the provider sent.
//!
//! Status-code contract: transient server-side failures reply 5xx so the
//! provider redelivers; everything non-retriable (accepted, ignored,
//! signature-reject, verification failure) replies 200.

use actix_web::{web, HttpRequest, HttpResponse};
use boxoffice_common::Currency;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::authed_user;
use crate::services::payments::{PaymentIntake, WebhookOutcome};

const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub booking_id: i64,
    pub amount: Decimal,
    pub currency: String,
}

pub async fn create_order(
    req: HttpRequest,
    intake: web::Data<PaymentIntake>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let body = body.into_inner();
    let currency: Currency = body
        .currency
        .parse()
        .map_err(|e: String| ApiError::Validation(e))?;

    let order = intake
        .create_order(body.booking_id, user.0, body.amount, currency)
        .await?;
    Ok(HttpResponse::Created().json(order))
}

pub async fn webhook(
    req: HttpRequest,
    intake: web::Data<PaymentIntake>,
    raw_body: web::Bytes,
) -> HttpResponse {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match intake.handle_webhook(&raw_body, signature).await {
        WebhookOutcome::Accepted { booking_id } => {
            HttpResponse::Ok().json(serde_json::json!({ "status": "ok", "booking_id": booking_id }))
        }
        WebhookOutcome::Ignored => {
            HttpResponse::Ok().json(serde_json::json!({ "status": "ignored" }))
        }
        WebhookOutcome::SignatureRejected => {
            // Logged upstream; 200 keeps a misconfigured provider from
            // hammering us with retries.
            HttpResponse::Ok().json(serde_json::json!({
                "status": "rejected",
                "code": "PAYMENT_VERIFICATION_FAILED",
            }))
        }
        WebhookOutcome::Rejected { reason } => HttpResponse::Ok().json(serde_json::json!({
            "status": "rejected",
            "code": "PAYMENT_VERIFICATION_FAILED",
            "message": reason,
        })),
        WebhookOutcome::Transient { reason } => {
            tracing::error!(reason = %reason, "webhook processing failed transiently");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "retry",
                "code": "INTERNAL",
            }))
        }
    }
}

pub async fn verify_order(
    req: HttpRequest,
    intake: web::Data<PaymentIntake>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let result = intake.verify_order(&path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(result))
}

pub fn configure_payment_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route("/create-order", web::post().to(create_order))
            .route("/verify/{order_id}", web::get().to(verify_order)),
    );
}
