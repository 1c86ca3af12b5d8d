//! Persistent token stores (blacklist + refresh)
//!
//! The relational rows are authoritative; the Redis entries in front of
//! them exist for O(1) lookups and expire on their own TTL.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{blacklisted_tokens, refresh_tokens};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = blacklisted_tokens)]
pub struct BlacklistedToken {
    pub token: String,
    pub user_id: i64,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

impl BlacklistedToken {
    pub fn insert(
        conn: &mut PgConnection,
        token: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::insert_into(blacklisted_tokens::table)
            .values((
                blacklisted_tokens::token.eq(token),
                blacklisted_tokens::user_id.eq(user_id),
                blacklisted_tokens::expires_at.eq(expires_at),
            ))
            .on_conflict(blacklisted_tokens::token)
            .do_nothing()
            .execute(conn)
    }

    /// Live blacklist entry for a token, if any.
    pub fn find_live(
        conn: &mut PgConnection,
        token: &str,
        now: NaiveDateTime,
    ) -> QueryResult<Option<BlacklistedToken>> {
        blacklisted_tokens::table
            .filter(blacklisted_tokens::token.eq(token))
            .filter(blacklisted_tokens::expires_at.gt(now))
            .first(conn)
            .optional()
    }

    pub fn delete_expired(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
        diesel::delete(blacklisted_tokens::table.filter(blacklisted_tokens::expires_at.lt(now)))
            .execute(conn)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: i64,
    pub revoked: bool,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

impl RefreshToken {
    pub fn upsert(
        conn: &mut PgConnection,
        token: &str,
        user_id: i64,
        expires_at: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::insert_into(refresh_tokens::table)
            .values((
                refresh_tokens::token.eq(token),
                refresh_tokens::user_id.eq(user_id),
                refresh_tokens::expires_at.eq(expires_at),
            ))
            .on_conflict(refresh_tokens::token)
            .do_update()
            .set((
                refresh_tokens::user_id.eq(user_id),
                refresh_tokens::expires_at.eq(expires_at),
                refresh_tokens::revoked.eq(false),
            ))
            .execute(conn)
    }

    pub fn find(conn: &mut PgConnection, token: &str) -> QueryResult<Option<RefreshToken>> {
        refresh_tokens::table
            .filter(refresh_tokens::token.eq(token))
            .first(conn)
            .optional()
    }

    /// Revoke every refresh token a user holds; returns the tokens so the
    /// caller can evict their KV entries too.
    pub fn revoke_all_for_user(
        conn: &mut PgConnection,
        user_id: i64,
    ) -> QueryResult<Vec<String>> {
        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked.eq(false)),
        )
        .set(refresh_tokens::revoked.eq(true))
        .returning(refresh_tokens::token)
        .get_results(conn)
    }

    pub fn delete_expired(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
        diesel::delete(refresh_tokens::table.filter(refresh_tokens::expires_at.lt(now)))
            .execute(conn)
    }
}
