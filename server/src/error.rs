//! API error taxonomy
//!
//! One error type crosses every service boundary. Each variant carries a
//! stable ASCII `code` on the wire plus a short human-readable message;
//! handlers never invent status codes of their own.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use thiserror::Error;

/// Wire envelope for all error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Token has been revoked")]
    AuthRevoked,

    #[error("{0}")]
    NotFound(String),

    /// Seat already taken, booking already confirmed, etc.
    #[error("{0}")]
    Conflict(String),

    /// Lock expired or not owned by the caller.
    #[error("{0}")]
    Stale(String),

    #[error("Too many requests")]
    RateLimited,

    /// Another request with the same idempotency key is in flight.
    #[error("A request with this idempotency key is already in progress")]
    InFlight,

    #[error("Payment verification failed")]
    PaymentVerificationFailed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::AuthRequired => "AUTH_REQUIRED",
            ApiError::AuthRevoked => "AUTH_REVOKED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Stale(_) => "STALE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::InFlight => "IN_FLIGHT",
            ApiError::PaymentVerificationFailed => "PAYMENT_VERIFICATION_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a retry might succeed without the caller changing anything.
    /// Drives the webhook retry contract: only INTERNAL replies 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Internal(_))
    }
}

impl actix_web::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthRequired | ApiError::AuthRevoked => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::InFlight => StatusCode::CONFLICT,
            ApiError::Stale(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            // Webhook handler maps this to 400/200 itself; elsewhere it is a client error.
            ApiError::PaymentVerificationFailed => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(detail) = self {
            tracing::error!(error = %detail, "internal error surfaced to client");
            // Detail stays in the logs; the wire gets a generic message.
            return HttpResponse::build(self.status_code()).json(ErrorBody {
                code: self.code(),
                message: "Internal server error".to_string(),
            });
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        })
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Preserve a typed ApiError that was wrapped in anyhow on the way up.
        match err.downcast::<ApiError>() {
            Ok(api) => api,
            Err(other) => ApiError::Internal(format!("{:#}", other)),
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ApiError::NotFound("Record not found".to_string()),
            other => ApiError::Internal(format!("database error: {}", other)),
        }
    }
}

impl From<diesel::r2d2::PoolError> for ApiError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        ApiError::Internal(format!("connection pool error: {}", err))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(ApiError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(ApiError::Stale("x".into()).code(), "STALE");
        assert_eq!(ApiError::InFlight.code(), "IN_FLIGHT");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Conflict("taken".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Stale("expired".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::InFlight.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_internal_is_transient() {
        assert!(ApiError::Internal("x".into()).is_transient());
        assert!(!ApiError::Conflict("x".into()).is_transient());
        assert!(!ApiError::PaymentVerificationFailed.is_transient());
    }

    #[test]
    fn anyhow_round_trip_preserves_variant() {
        let wrapped = anyhow::Error::from(ApiError::Stale("lock expired".into()));
        let back: ApiError = wrapped.into();
        assert_eq!(back.code(), "STALE");
    }
}
