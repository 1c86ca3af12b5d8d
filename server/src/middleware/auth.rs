//! Authentication middleware
//!
//! The core consumes a verified identity: a bearer token signed elsewhere.
//! This middleware checks the signature and expiry, consults the token
//! gate for revocation, and attaches the user id to request extensions.
//! It issues nothing.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::token_gate::TokenGate;

/// Verified caller identity, stored in request extensions.
#[derive(Clone, Copy, Debug)]
pub struct AuthedUser(pub i64);

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Verify a bearer token: signature, expiry, then revocation.
pub async fn verify_access_token(
    gate: &TokenGate,
    jwt_secret: &str,
    token: &str,
) -> Result<i64, ApiError> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::AuthRequired)?;

    let user_id: i64 = decoded
        .claims
        .sub
        .parse()
        .map_err(|_| ApiError::AuthRequired)?;

    if gate.is_blacklisted(token).await {
        return Err(ApiError::AuthRevoked);
    }

    Ok(user_id)
}

/// Pull the bearer token out of an Authorization header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that requires a valid, unrevoked bearer token.
pub struct RequireAuth {
    gate: Arc<TokenGate>,
    jwt_secret: String,
}

impl RequireAuth {
    pub fn new(gate: Arc<TokenGate>, jwt_secret: String) -> Self {
        Self { gate, jwt_secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireAuthMiddleware {
            service: Rc::new(service),
            gate: self.gate.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }))
    }
}

pub struct RequireAuthMiddleware<S> {
    service: Rc<S>,
    gate: Arc<TokenGate>,
    jwt_secret: String,
}

impl<S, B> Service<ServiceRequest> for RequireAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let gate = self.gate.clone();
        let jwt_secret = self.jwt_secret.clone();

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_owned);

            let Some(token) = token else {
                return Err(ApiError::AuthRequired.into());
            };

            let user_id = verify_access_token(&gate, &jwt_secret, &token).await?;
            req.extensions_mut().insert(AuthedUser(user_id));

            svc.call(req).await
        })
    }
}

/// Fetch the authenticated user a handler runs as. Only valid behind
/// `RequireAuth`.
pub fn authed_user(req: &actix_web::HttpRequest) -> Result<AuthedUser, ApiError> {
    req.extensions()
        .get::<AuthedUser>()
        .copied()
        .ok_or(ApiError::AuthRequired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
