//! Payment intake
//!
//! Creates provider-side orders for pending bookings and verifies/dispatches
//! inbound webhooks. The webhook signature is HMAC-SHA256 over the raw
//! request bytes, compared in constant time; the parsed payload is never
//! trusted before the signature passes.

use boxoffice_common::{amounts_match, from_minor_units, to_minor_units, Currency};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PaymentConfig;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::Booking;
use crate::services::booking::BookingCoordinator;

type HmacSha256 = Hmac<Sha256>;

const PROVIDER_TIMEOUT_SECS: u64 = 30;
const GATEWAY_NAME: &str = "razorpay";

/// Provider order as returned to the client for checkout.
#[derive(Debug, Serialize)]
pub struct OrderView {
    pub order_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub expires_at: chrono::NaiveDateTime,
}

/// Result of webhook processing; the handler maps this to a status code.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// Funds acknowledged and booking confirmed (or already confirmed).
    Accepted { booking_id: i64 },
    /// Valid event we deliberately do not act on.
    Ignored,
    /// Signature did not verify; logged, never retried.
    SignatureRejected,
    /// Verified but unusable (unknown order, amount mismatch, expired
    /// booking). Non-retriable.
    Rejected { reason: String },
    /// Transient store failure; the provider should redeliver.
    Transient { reason: String },
}

#[derive(Debug, Deserialize)]
struct ProviderOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: Option<WebhookEntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntityWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: String,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
}

pub struct PaymentIntake {
    db: DbPool,
    coordinator: Arc<BookingCoordinator>,
    client: reqwest::Client,
    config: PaymentConfig,
}

impl PaymentIntake {
    pub fn new(
        db: DbPool,
        coordinator: Arc<BookingCoordinator>,
        config: PaymentConfig,
    ) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .user_agent("Boxoffice-Payments/1.0")
            .build()
            .expect("Failed to build payment HTTP client");

        Arc::new(Self {
            db,
            coordinator,
            client,
            config,
        })
    }

    /// Create a provider order bound to a pending booking. The declared
    /// amount must match the booking total within tolerance.
    pub async fn create_order(
        &self,
        booking_id: i64,
        user_id: i64,
        amount: Decimal,
        currency: Currency,
    ) -> Result<OrderView, ApiError> {
        let booking = db::run(&self.db, move |conn| {
            Booking::find(conn, booking_id).map_err(ApiError::from)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking {} not found", booking_id)))?;

        if booking.user_id != user_id {
            return Err(ApiError::NotFound(format!(
                "Booking {} not found",
                booking_id
            )));
        }
        if booking.status != crate::models::booking::STATUS_PENDING {
            return Err(ApiError::Conflict(format!(
                "Booking is {}; an order can only be created for a pending booking",
                booking.status
            )));
        }
        if !amounts_match(amount, booking.total_amount) {
            return Err(ApiError::Validation(format!(
                "Amount {} does not match booking total {}",
                amount, booking.total_amount
            )));
        }

        let minor = to_minor_units(booking.total_amount, currency).ok_or_else(|| {
            ApiError::Validation("Booking total has sub-minor-unit precision".to_string())
        })?;

        let body = serde_json::json!({
            "amount": minor,
            "currency": currency.code(),
            "receipt": booking.reference,
        });

        let response = self
            .client
            .post(format!("{}/orders", self.config.api_base))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("payment provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!(
                "payment provider returned {}: {}",
                status, detail
            )));
        }

        let order: ProviderOrderResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("provider order parse: {}", e)))?;

        // The order id sits in payment_id until the webhook overwrites it
        // with the payment id at confirmation.
        let order_id = order.id.clone();
        db::run(&self.db, move |conn| {
            Booking::set_payment_order(conn, booking_id, &order_id, GATEWAY_NAME)?;
            Ok(())
        })
        .await?;

        tracing::info!(
            booking_id,
            order_id = %order.id,
            amount_minor = order.amount,
            "provider order created"
        );

        Ok(OrderView {
            order_id: order.id,
            amount_minor_units: order.amount,
            currency: order.currency,
            expires_at: booking.expires_at,
        })
    }

    /// Verify and dispatch an inbound webhook. Never parses the body before
    /// the signature over the raw bytes has passed.
    pub async fn handle_webhook(&self, raw_body: &[u8], signature_header: &str) -> WebhookOutcome {
        if !self.verify_signature(raw_body, signature_header) {
            tracing::warn!("webhook rejected: signature mismatch");
            return WebhookOutcome::SignatureRejected;
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(raw_body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "webhook rejected: unparseable body");
                return WebhookOutcome::Rejected {
                    reason: "unparseable webhook body".to_string(),
                };
            }
        };

        match envelope.event.as_str() {
            // Both mean "funds acknowledged".
            "payment.captured" | "payment.authorized" => {}
            "payment.failed" => {
                return self.handle_payment_failed(envelope).await;
            }
            other => {
                tracing::debug!(event = %other, "webhook event accepted and ignored");
                return WebhookOutcome::Ignored;
            }
        }

        let Some(payment) = envelope.payload.payment.map(|p| p.entity) else {
            return WebhookOutcome::Rejected {
                reason: "missing payment entity".to_string(),
            };
        };

        let order_id = payment.order_id.clone();
        let booking = match db::run(&self.db, move |conn| {
            Booking::find_by_payment_id(conn, &order_id).map_err(ApiError::from)
        })
        .await
        {
            Ok(Some(booking)) => booking,
            Ok(None) => {
                tracing::warn!(order_id = %payment.order_id, "webhook for unknown order");
                return WebhookOutcome::Rejected {
                    reason: format!("no booking for order {}", payment.order_id),
                };
            }
            Err(e) => {
                return WebhookOutcome::Transient {
                    reason: format!("booking lookup failed: {}", e),
                };
            }
        };

        // Reject partial captures outside tolerance.
        let currency = payment
            .currency
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(Currency::INR);
        let paid = from_minor_units(payment.amount, currency);
        if !amounts_match(paid, booking.total_amount) {
            tracing::warn!(
                booking_id = booking.id,
                paid = %paid,
                expected = %booking.total_amount,
                "webhook amount mismatch"
            );
            return WebhookOutcome::Rejected {
                reason: "amount mismatch".to_string(),
            };
        }

        match self
            .coordinator
            .confirm_booking(booking.id, &payment.id, GATEWAY_NAME)
            .await
        {
            Ok(confirmation) => {
                if confirmation.already_confirmed {
                    tracing::info!(booking_id = booking.id, "webhook redelivery, already confirmed");
                }
                WebhookOutcome::Accepted {
                    booking_id: booking.id,
                }
            }
            Err(e) if e.is_transient() => WebhookOutcome::Transient {
                reason: e.to_string(),
            },
            Err(e) => {
                tracing::warn!(booking_id = booking.id, error = %e, "webhook confirmation rejected");
                WebhookOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn handle_payment_failed(&self, envelope: WebhookEnvelope) -> WebhookOutcome {
        let Some(payment) = envelope.payload.payment.map(|p| p.entity) else {
            return WebhookOutcome::Rejected {
                reason: "missing payment entity".to_string(),
            };
        };

        let order_id = payment.order_id.clone();
        let booking = match db::run(&self.db, move |conn| {
            Booking::find_by_payment_id(conn, &order_id).map_err(ApiError::from)
        })
        .await
        {
            Ok(Some(booking)) => booking,
            Ok(None) => return WebhookOutcome::Ignored,
            Err(e) => {
                return WebhookOutcome::Transient {
                    reason: format!("booking lookup failed: {}", e),
                };
            }
        };

        match self.coordinator.mark_payment_failed(booking.id).await {
            Ok(()) => {
                tracing::info!(booking_id = booking.id, "payment marked failed");
                WebhookOutcome::Accepted {
                    booking_id: booking.id,
                }
            }
            Err(e) if e.is_transient() => WebhookOutcome::Transient {
                reason: e.to_string(),
            },
            Err(e) => WebhookOutcome::Rejected {
                reason: e.to_string(),
            },
        }
    }

    /// Polling fallback for clients that missed the socket event.
    pub async fn verify_order(
        &self,
        order_id: &str,
        user_id: i64,
    ) -> Result<serde_json::Value, ApiError> {
        let order_id = order_id.to_string();
        let booking = db::run(&self.db, move |conn| {
            Booking::find_by_payment_id(conn, &order_id).map_err(ApiError::from)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

        if booking.user_id != user_id {
            return Err(ApiError::NotFound("Order not found".to_string()));
        }

        Ok(serde_json::json!({
            "booking_id": booking.id,
            "reference": booking.reference,
            "status": booking.status,
            "payment_status": booking.payment_status,
        }))
    }

    /// Constant-time HMAC-SHA256 verification over the raw bytes.
    fn verify_signature(&self, raw_body: &[u8], signature_header: &str) -> bool {
        let Ok(expected) = hex::decode(signature_header.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) else {
            return false;
        };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Sign a payload the way the provider does; used by tests and local
/// tooling to fabricate valid webhook deliveries.
pub fn sign_webhook(secret: &str, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let secret = "whsec_test";
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign_webhook(secret, body);

        let config = PaymentConfig {
            key_id: "key".into(),
            key_secret: "secret".into(),
            webhook_secret: secret.into(),
            api_base: "http://localhost".into(),
        };
        let mut mac = HmacSha256::new_from_slice(config.webhook_secret.as_bytes()).unwrap();
        mac.update(body);
        assert!(mac.verify_slice(&hex::decode(&signature).unwrap()).is_ok());

        // A flipped byte must not verify.
        let mut tampered = body.to_vec();
        tampered[0] ^= 1;
        let mut mac = HmacSha256::new_from_slice(config.webhook_secret.as_bytes()).unwrap();
        mac.update(&tampered);
        assert!(mac.verify_slice(&hex::decode(&signature).unwrap()).is_err());
    }

    #[test]
    fn webhook_envelope_parses_provider_shape() {
        let body = serde_json::json!({
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_X",
                        "order_id": "order_Y",
                        "amount": 50000,
                        "currency": "INR",
                    }
                }
            }
        });
        let envelope: WebhookEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.event, "payment.captured");
        let entity = envelope.payload.payment.unwrap().entity;
        assert_eq!(entity.id, "pay_X");
        assert_eq!(entity.order_id, "order_Y");
        assert_eq!(entity.amount, 50_000);
    }
}
