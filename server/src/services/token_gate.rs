//! Token gate
//!
//! O(1) "is this token revoked?" at every privileged boundary. KV entries
//! carry a TTL tied to token expiry; the relational rows are the
//! authoritative mirror. Blacklist reads fail open on a KV outage:
//! availability over security margin for short-lived access tokens.

use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;

use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::{BlacklistedToken, RefreshToken};
use crate::redis_pool::{self, RedisPool, RefreshEntry};

pub struct TokenGate {
    db: DbPool,
    redis: RedisPool,
}

/// Refresh-token record as seen by the identity boundary.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub user_id: i64,
    pub revoked: bool,
    pub expires_at: NaiveDateTime,
}

fn remaining_ttl_secs(expires_at: NaiveDateTime) -> u64 {
    let now = Utc::now().naive_utc();
    (expires_at - now).num_seconds().max(0) as u64
}

impl TokenGate {
    pub fn new(db: DbPool, redis: RedisPool) -> Arc<Self> {
        Arc::new(Self { db, redis })
    }

    /// KV first; on miss, read through to the DB and repopulate with the
    /// remaining TTL. KV errors degrade to the DB path.
    pub async fn is_blacklisted(&self, token: &str) -> bool {
        match redis_pool::is_blacklisted_cached(&self.redis, token).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "blacklist cache unavailable, consulting DB");
            }
        }

        let token_owned = token.to_string();
        let row = db::run(&self.db, move |conn| {
            let now = Utc::now().naive_utc();
            BlacklistedToken::find_live(conn, &token_owned, now).map_err(ApiError::from)
        })
        .await;

        match row {
            Ok(Some(entry)) => {
                let ttl = remaining_ttl_secs(entry.expires_at);
                if let Err(e) = redis_pool::set_blacklisted(&self.redis, token, ttl).await {
                    tracing::warn!(error = %e, "blacklist cache repopulate failed");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                // Fail open: a short-lived access token passes rather than
                // locking everyone out with the store.
                tracing::error!(error = %e, "blacklist DB lookup failed; failing open");
                false
            }
        }
    }

    pub async fn blacklist(
        &self,
        token: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
    ) -> Result<(), ApiError> {
        let token_owned = token.to_string();
        db::run(&self.db, move |conn| {
            BlacklistedToken::insert(conn, &token_owned, user_id, expires_at)?;
            Ok(())
        })
        .await?;

        let ttl = remaining_ttl_secs(expires_at);
        if let Err(e) = redis_pool::set_blacklisted(&self.redis, token, ttl).await {
            tracing::warn!(error = %e, "blacklist cache write failed; DB row stands");
        }
        Ok(())
    }

    pub async fn cache_refresh(
        &self,
        token: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
    ) -> Result<(), ApiError> {
        let token_owned = token.to_string();
        db::run(&self.db, move |conn| {
            RefreshToken::upsert(conn, &token_owned, user_id, expires_at)?;
            Ok(())
        })
        .await?;

        let entry = RefreshEntry {
            user_id,
            revoked: false,
            expires_at: expires_at.and_utc().timestamp(),
        };
        let ttl = remaining_ttl_secs(expires_at);
        if let Err(e) = redis_pool::cache_refresh_entry(&self.redis, token, &entry, ttl).await {
            tracing::warn!(error = %e, "refresh cache write failed; DB row stands");
        }
        Ok(())
    }

    pub async fn get_refresh(&self, token: &str) -> Result<Option<RefreshRecord>, ApiError> {
        match redis_pool::get_refresh_entry(&self.redis, token).await {
            Ok(Some(entry)) => {
                return Ok(Some(RefreshRecord {
                    user_id: entry.user_id,
                    revoked: entry.revoked,
                    expires_at: chrono::DateTime::from_timestamp(entry.expires_at, 0)
                        .map(|dt| dt.naive_utc())
                        .unwrap_or_default(),
                }));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "refresh cache unavailable, consulting DB");
            }
        }

        let token_owned = token.to_string();
        let row = db::run(&self.db, move |conn| {
            RefreshToken::find(conn, &token_owned).map_err(ApiError::from)
        })
        .await?;

        if let Some(row) = &row {
            if !row.revoked {
                let entry = RefreshEntry {
                    user_id: row.user_id,
                    revoked: false,
                    expires_at: row.expires_at.and_utc().timestamp(),
                };
                let ttl = remaining_ttl_secs(row.expires_at);
                if let Err(e) =
                    redis_pool::cache_refresh_entry(&self.redis, token, &entry, ttl).await
                {
                    tracing::warn!(error = %e, "refresh cache repopulate failed");
                }
            }
        }

        Ok(row.map(|r| RefreshRecord {
            user_id: r.user_id,
            revoked: r.revoked,
            expires_at: r.expires_at,
        }))
    }

    /// Revoke every refresh token for a user, in both stores.
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<usize, ApiError> {
        let tokens = db::run(&self.db, move |conn| {
            RefreshToken::revoke_all_for_user(conn, user_id).map_err(ApiError::from)
        })
        .await?;

        let keys: Vec<String> = tokens
            .iter()
            .map(|t| redis_pool::refresh_token_key(t))
            .collect();
        if let Err(e) = redis_pool::delete_keys(&self.redis, &keys).await {
            tracing::warn!(error = %e, user_id, "refresh cache eviction failed");
        }

        tracing::info!(user_id, count = tokens.len(), "revoked all refresh tokens");
        Ok(tokens.len())
    }
}
