//! Idempotency store
//!
//! Deduplicates mutating requests that carry a client-supplied key. The
//! claim is a conditional insert; an existing row is either an in-flight
//! request (conflict), a finished one (replay the snapshot), or a failed /
//! expired one (reclaim and retry).

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::idempotency::{self, IdempotencyKey};

/// Keys live for 24 hours.
const KEY_TTL_HOURS: i64 = 24;

/// Outcome of claiming a key before running the operation.
#[derive(Debug)]
pub enum Claim {
    /// This request owns the operation; run it, then complete or fail.
    Started,
    /// The operation already ran; serve the stored response verbatim.
    Replay(String),
}

pub struct IdempotencyStore {
    db: DbPool,
}

impl IdempotencyStore {
    pub fn new(db: DbPool) -> Arc<Self> {
        Arc::new(Self { db })
    }

    /// Accepts UUIDs or any `[A-Za-z0-9_-]{1,255}` token.
    pub fn validate_key(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= 255
            && key
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    }

    /// Claim `key` for an operation. `ErrInFlight` when another request
    /// with the same key has not finished yet.
    pub async fn begin(
        &self,
        key: &str,
        operation_type: &str,
        resource_id: Option<String>,
        user_id: i64,
    ) -> Result<Claim, ApiError> {
        if !Self::validate_key(key) {
            return Err(ApiError::Validation(
                "Idempotency key must be 1-255 characters of [A-Za-z0-9_-]".to_string(),
            ));
        }

        let key = key.to_string();
        let operation_type = operation_type.to_string();

        db::run(&self.db, move |conn| {
            let now = Utc::now().naive_utc();
            let expires_at = now + Duration::hours(KEY_TTL_HOURS);

            let claimed = IdempotencyKey::try_claim(
                conn,
                &key,
                &operation_type,
                resource_id.as_deref(),
                user_id,
                expires_at,
            )?;
            if claimed {
                return Ok(Claim::Started);
            }

            let existing = IdempotencyKey::find(conn, &key)?
                .ok_or_else(|| ApiError::Internal("idempotency row vanished".to_string()))?;

            // A key is scoped to its owner; someone else's key is a clash.
            if existing.user_id != user_id || existing.operation_type != operation_type {
                return Err(ApiError::Conflict(
                    "Idempotency key is already used by another operation".to_string(),
                ));
            }

            match existing.status.as_str() {
                idempotency::STATUS_COMPLETED => {
                    let snapshot = existing.response_snapshot.unwrap_or_default();
                    Ok(Claim::Replay(snapshot))
                }
                idempotency::STATUS_PENDING if existing.expires_at > now => {
                    Err(ApiError::InFlight)
                }
                // Failed, or a pending claim that expired: reclaim.
                _ => {
                    if IdempotencyKey::reclaim_stale(conn, &key, now, expires_at)? {
                        Ok(Claim::Started)
                    } else {
                        Err(ApiError::InFlight)
                    }
                }
            }
        })
        .await
    }

    /// Store the serialized response and mark the key completed.
    pub async fn complete(&self, key: &str, snapshot: String) -> Result<(), ApiError> {
        let key = key.to_string();
        db::run(&self.db, move |conn| {
            IdempotencyKey::mark_completed(conn, &key, &snapshot)?;
            Ok(())
        })
        .await
    }

    /// Release the claim after a failed operation so a retry can run.
    pub async fn fail(&self, key: &str) {
        let key = key.to_string();
        let result = db::run(&self.db, move |conn| {
            IdempotencyKey::mark_failed(conn, &key)?;
            Ok(())
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to mark idempotency key failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(IdempotencyStore::validate_key(
            "550e8400-e29b-41d4-a716-446655440000"
        ));
        assert!(IdempotencyStore::validate_key("my-custom-key_123"));

        assert!(!IdempotencyStore::validate_key(""));
        assert!(!IdempotencyStore::validate_key(&"a".repeat(256)));
        assert!(!IdempotencyStore::validate_key("key with spaces"));
        assert!(!IdempotencyStore::validate_key("key;injection"));
    }
}
