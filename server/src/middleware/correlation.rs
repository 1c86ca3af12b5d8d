//! Correlation middleware
//!
//! Every request gets a server-minted correlation id. The id is never
//! taken from the client: a client-supplied `X-Request-ID` is recorded as
//! a span field for cross-referencing, but cannot influence our own id
//! space. Internal errors surface to the client as a bare INTERNAL code;
//! the correlation id in the response header is what links that reply
//! back to the logged detail.

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::Instrument;
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";

/// Server-assigned correlation id, available in request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Middleware factory.
pub struct Correlate;

impl<S, B> Transform<S, ServiceRequest> for Correlate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CorrelateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorrelateMiddleware {
            inner: Rc::new(service),
        }))
    }
}

pub struct CorrelateMiddleware<S> {
    inner: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for CorrelateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(inner);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let correlation = CorrelationId(Uuid::new_v4());

            // A client id is context, not identity.
            let client_hint = req
                .headers()
                .get("X-Request-ID")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            req.extensions_mut().insert(correlation);

            let span = tracing::info_span!(
                "http",
                correlation_id = %correlation,
                client_request_id = %client_hint,
                method = %req.method(),
                path = %req.path(),
            );

            let mut response = inner.call(req).instrument(span).await?;

            // The wire carries only the generic INTERNAL envelope on 5xx;
            // this line plus the header is how a report gets matched to
            // the full detail in the logs.
            if response.status().is_server_error() {
                tracing::error!(
                    correlation_id = %correlation,
                    status = response.status().as_u16(),
                    "request failed with server error"
                );
            }

            response.headers_mut().insert(
                HeaderName::from_static(CORRELATION_HEADER),
                HeaderValue::from_str(&correlation.to_string())
                    .unwrap_or(HeaderValue::from_static("invalid")),
            );

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_distinct_and_displayable() {
        let a = CorrelationId(Uuid::new_v4());
        let b = CorrelationId(Uuid::new_v4());
        assert_ne!(a, b);
        // Must always be a valid header value.
        assert!(HeaderValue::from_str(&a.to_string()).is_ok());
    }
}
