//! Idempotency key rows
//!
//! One row per client-supplied key. The conditional insert is the claim:
//! whoever writes the row first owns the operation; everyone else either
//! waits out the in-flight request or replays the stored snapshot.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::idempotency_keys;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = idempotency_keys)]
pub struct IdempotencyKey {
    pub key: String,
    pub operation_type: String,
    pub resource_id: Option<String>,
    pub user_id: i64,
    pub status: String,
    pub response_snapshot: Option<String>,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl IdempotencyKey {
    /// Claim a key. Returns true when this request now owns the operation.
    pub fn try_claim(
        conn: &mut PgConnection,
        key: &str,
        operation_type: &str,
        resource_id: Option<&str>,
        user_id: i64,
        expires_at: NaiveDateTime,
    ) -> QueryResult<bool> {
        let inserted = diesel::insert_into(idempotency_keys::table)
            .values((
                idempotency_keys::key.eq(key),
                idempotency_keys::operation_type.eq(operation_type),
                idempotency_keys::resource_id.eq(resource_id),
                idempotency_keys::user_id.eq(user_id),
                idempotency_keys::status.eq(STATUS_PENDING),
                idempotency_keys::expires_at.eq(expires_at),
            ))
            .on_conflict(idempotency_keys::key)
            .do_nothing()
            .execute(conn)?;
        Ok(inserted == 1)
    }

    pub fn find(conn: &mut PgConnection, key: &str) -> QueryResult<Option<IdempotencyKey>> {
        idempotency_keys::table
            .filter(idempotency_keys::key.eq(key))
            .first(conn)
            .optional()
    }

    /// Re-arm a key whose previous attempt failed or whose claim expired,
    /// so the caller may retry. Returns true when the key was reclaimed.
    pub fn reclaim_stale(
        conn: &mut PgConnection,
        key: &str,
        now: NaiveDateTime,
        new_expires_at: NaiveDateTime,
    ) -> QueryResult<bool> {
        let updated = diesel::update(
            idempotency_keys::table
                .filter(idempotency_keys::key.eq(key))
                .filter(
                    idempotency_keys::status
                        .eq(STATUS_FAILED)
                        .or(idempotency_keys::expires_at.le(now)),
                ),
        )
        .set((
            idempotency_keys::status.eq(STATUS_PENDING),
            idempotency_keys::response_snapshot.eq(None::<String>),
            idempotency_keys::expires_at.eq(new_expires_at),
        ))
        .execute(conn)?;
        Ok(updated == 1)
    }

    pub fn mark_completed(
        conn: &mut PgConnection,
        key: &str,
        snapshot: &str,
    ) -> QueryResult<usize> {
        diesel::update(idempotency_keys::table.filter(idempotency_keys::key.eq(key)))
            .set((
                idempotency_keys::status.eq(STATUS_COMPLETED),
                idempotency_keys::response_snapshot.eq(snapshot),
            ))
            .execute(conn)
    }

    pub fn mark_failed(conn: &mut PgConnection, key: &str) -> QueryResult<usize> {
        diesel::update(idempotency_keys::table.filter(idempotency_keys::key.eq(key)))
            .set(idempotency_keys::status.eq(STATUS_FAILED))
            .execute(conn)
    }

    pub fn delete_expired(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
        diesel::delete(idempotency_keys::table.filter(idempotency_keys::expires_at.lt(now)))
            .execute(conn)
    }
}
