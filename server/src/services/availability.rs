//! Availability cache
//!
//! Constant-time reads of `available_quantity` for UI queries and
//! broadcast payloads. The counter is a projection of the seat-type row:
//! populated lazily on miss, nudged by atomic INCR/DECR after each commit,
//! clamped at zero, and expired by TTL. The sweeper bounds any drift.

use std::sync::Arc;

use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::SeatType;
use crate::redis_pool::{self, RedisPool};

pub struct AvailabilityCache {
    db: DbPool,
    redis: RedisPool,
}

impl AvailabilityCache {
    pub fn new(db: DbPool, redis: RedisPool) -> Arc<Self> {
        Arc::new(Self { db, redis })
    }

    /// Cached availability for a seat type; on miss, re-derive from the
    /// authoritative row and populate.
    pub async fn get(&self, event_id: i64, seat_type_id: i64) -> Result<i32, ApiError> {
        let key = redis_pool::avail_key(event_id, seat_type_id);

        match redis_pool::get_counter(&self.redis, &key).await {
            Ok(Some(value)) => return Ok(value.max(0) as i32),
            Ok(None) => {}
            Err(e) => {
                // Cache trouble never fails a read; fall through to the DB.
                tracing::warn!(error = %e, key = %key, "availability cache read failed");
            }
        }

        let seat_type = db::run(&self.db, move |conn| {
            SeatType::find(conn, seat_type_id).map_err(ApiError::from)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Seat type {} not found", seat_type_id)))?;

        let value = seat_type.available_quantity;
        if let Err(e) = redis_pool::set_counter(&self.redis, &key, value as i64).await {
            tracing::warn!(error = %e, key = %key, "availability cache populate failed");
        }
        Ok(value)
    }

    /// Post-commit decrement. Returns the cached value when the counter was
    /// populated; misses are left for the next lazy read.
    pub async fn decrement(&self, event_id: i64, seat_type_id: i64) -> Option<i64> {
        let key = redis_pool::avail_key(event_id, seat_type_id);
        match redis_pool::decrement_counter_clamped(&self.redis, &key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "availability decrement failed");
                None
            }
        }
    }

    /// Post-commit increment by `count`.
    pub async fn increment(&self, event_id: i64, seat_type_id: i64, count: i64) -> Option<i64> {
        let key = redis_pool::avail_key(event_id, seat_type_id);
        match redis_pool::increment_counter(&self.redis, &key, count).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "availability increment failed");
                None
            }
        }
    }

    /// Drop only the event-details cache; the counter keeps riding its
    /// atomic INCR/DECR stream.
    pub async fn invalidate_event_details(&self, event_id: i64) {
        let keys = vec![redis_pool::event_cache_key(event_id)];
        if let Err(e) = redis_pool::delete_keys(&self.redis, &keys).await {
            tracing::warn!(error = %e, event_id, "event cache invalidation failed");
        }
    }

    /// Drop the counter for one seat type, plus the event-details cache.
    pub async fn invalidate(&self, event_id: i64, seat_type_id: i64) {
        let keys = vec![
            redis_pool::avail_key(event_id, seat_type_id),
            redis_pool::event_cache_key(event_id),
        ];
        if let Err(e) = redis_pool::delete_keys(&self.redis, &keys).await {
            tracing::warn!(error = %e, event_id, seat_type_id, "cache invalidation failed");
        }
    }

}
