//! Seat lock manager
//!
//! At-most-one-holder seat reservations under arbitrary concurrency. The
//! KV conditional set is the fast-path arbiter; the relational unique
//! constraint on `(seat_type_id, seat_label)` is the final one. Whenever
//! the relational side loses after the KV side won, the KV entry is
//! compensated away before the error returns.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{BusEvent, EventBus, LockInfo, Origin};
use crate::config::LockConfig;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::seat::{self, NewSeat, Seat};
use crate::models::{Event, SeatType};
use crate::redis_pool::{self, RedisPool, SeatLockEntry};
use crate::services::availability::AvailabilityCache;
use crate::validation;

/// A live soft lock, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct Lock {
    pub event_id: i64,
    pub seat_type_id: i64,
    pub seat_label: String,
    pub user_id: i64,
    pub locked_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// Longest single extension a holder may request.
const MAX_EXTEND_SECS: i64 = 3600;

pub struct SeatLockManager {
    db: DbPool,
    redis: RedisPool,
    availability: Arc<AvailabilityCache>,
    bus: Arc<dyn EventBus>,
    config: LockConfig,
}

impl SeatLockManager {
    pub fn new(
        db: DbPool,
        redis: RedisPool,
        availability: Arc<AvailabilityCache>,
        bus: Arc<dyn EventBus>,
        config: LockConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            redis,
            availability,
            bus,
            config,
        })
    }

    /// Reserve a seat for the lock TTL.
    ///
    /// 1. KV create-if-absent with TTL. Losing here is the fast-path
    ///    conflict, no DB work done.
    /// 2. One relational transaction: claim the row via the unique
    ///    constraint, then decrement availability under its own guard.
    /// 3. Any failure after step 1, including the deadline, deletes the KV
    ///    entry before the error returns.
    pub async fn acquire(
        &self,
        origin: Origin,
        event_id: i64,
        seat_type_id: i64,
        raw_label: &str,
        user_id: i64,
    ) -> Result<Lock, ApiError> {
        validation::check_id("event_id", event_id)?;
        validation::check_id("seat_type_id", seat_type_id)?;
        let label = validation::parse_seat_label(raw_label)?;

        self.ensure_event_open(event_id).await?;

        let now = Utc::now().naive_utc();
        let expires_at = now + Duration::seconds(self.config.lock_ttl_secs as i64);
        let key = redis_pool::seat_lock_key(event_id, seat_type_id, label.as_str());
        let entry = SeatLockEntry {
            user_id,
            locked_at: now.and_utc().timestamp(),
            expires_at: expires_at.and_utc().timestamp(),
        };

        let won_fast_path =
            redis_pool::try_acquire_seat_lock(&self.redis, &key, &entry, self.config.lock_ttl_secs)
                .await
                .map_err(|e| ApiError::Internal(format!("seat lock store: {:#}", e)))?;

        if !won_fast_path {
            return Err(ApiError::Conflict(format!(
                "Seat {} is already taken. Please select another seat.",
                label
            )));
        }

        let label_str = label.as_str().to_string();
        let persist = self.persist_lock(event_id, seat_type_id, label_str.clone(), user_id, now, expires_at);

        let outcome = match tokio::time::timeout(self.config.acquire_deadline, persist).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Internal(format!(
                "seat lock acquire exceeded {:?} deadline",
                self.config.acquire_deadline
            ))),
        };

        let remaining = match outcome {
            Ok(remaining) => remaining,
            Err(e) => {
                // The persisted slot was not taken; the KV entry must not
                // outlive this request.
                if let Err(comp) =
                    redis_pool::delete_seat_lock_if_holder(&self.redis, &key, user_id).await
                {
                    tracing::error!(
                        error = %comp,
                        key = %key,
                        "failed to compensate seat lock after DB rejection"
                    );
                }
                return Err(e);
            }
        };

        self.availability.decrement(event_id, seat_type_id).await;
        self.availability.invalidate_event_details(event_id).await;

        self.bus.publish(
            origin,
            BusEvent::SeatLocked {
                event_id,
                seat_type_id,
                seat_label: label_str.clone(),
                user_id,
                available_quantity: remaining,
                lock: LockInfo {
                    user_id,
                    locked_at: entry.locked_at,
                    expires_at: entry.expires_at,
                },
            },
        );

        tracing::info!(event_id, seat_type_id, seat_label = %label_str, user_id, "seat locked");

        Ok(Lock {
            event_id,
            seat_type_id,
            seat_label: label_str,
            user_id,
            locked_at: now,
            expires_at,
        })
    }

    /// The relational half of acquire. Returns the remaining availability
    /// after the decrement.
    async fn persist_lock(
        &self,
        event_id: i64,
        seat_type_id: i64,
        seat_label: String,
        user_id: i64,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> Result<i32, ApiError> {
        db::transaction(&self.db, move |conn| {
            let seat_type = SeatType::find(conn, seat_type_id)?
                .filter(|st| st.event_id == event_id)
                .ok_or_else(|| {
                    ApiError::NotFound(format!("Seat type {} not found", seat_type_id))
                })?;

            let inserted = Seat::try_insert_locked(
                conn,
                NewSeat {
                    event_id,
                    seat_type_id: seat_type.id,
                    seat_label: seat_label.clone(),
                    status: seat::STATUS_LOCKED.to_string(),
                    owner_user_id: user_id,
                    locked_at: now,
                    expires_at,
                },
            )?;

            if inserted.is_none() {
                // Another transaction holds the persisted slot. The KV
                // winner compensates outside.
                return Err(ApiError::Conflict(format!(
                    "Seat {} is already taken. Please select another seat.",
                    seat_label
                )));
            }

            // A free label with zero availability means the counter and the
            // seat rows disagree; refuse and roll the row back.
            let remaining = SeatType::take_one(conn, seat_type_id)?.ok_or_else(|| {
                tracing::error!(
                    seat_type_id,
                    seat_label = %seat_label,
                    "label free but availability exhausted; rolling back"
                );
                ApiError::Conflict("No availability left for this seat type".to_string())
            })?;

            Ok(remaining)
        })
        .await
    }

    /// Release a lock. Only the holder releases; returns whether a lock was
    /// in fact released.
    pub async fn release(
        &self,
        _origin: Origin,
        event_id: i64,
        seat_type_id: i64,
        raw_label: &str,
        user_id: i64,
    ) -> Result<bool, ApiError> {
        let label = validation::parse_seat_label(raw_label)?;
        let key = redis_pool::seat_lock_key(event_id, seat_type_id, label.as_str());

        // Best-effort KV removal first so other clients' fast path opens up.
        if let Err(e) = redis_pool::delete_seat_lock_if_holder(&self.redis, &key, user_id).await {
            tracing::warn!(error = %e, key = %key, "KV release failed; row delete proceeds");
        }

        let label_str = label.as_str().to_string();
        let released = db::transaction(&self.db, move |conn| {
            let deleted = Seat::delete_lock_of_holder(conn, seat_type_id, &label_str, user_id)?;
            if let Some(seat) = &deleted {
                SeatType::restore(conn, seat.seat_type_id, 1)?;
            }
            Ok(deleted.is_some())
        })
        .await?;

        if released {
            self.availability.increment(event_id, seat_type_id, 1).await;
            self.availability.invalidate_event_details(event_id).await;
            tracing::info!(event_id, seat_type_id, seat_label = %label, user_id, "seat released");
        }

        Ok(released)
    }

    /// Extend a held lock. The new expiry is an absolute timestamp computed
    /// here, never a store-side interval derived from user input.
    pub async fn extend(
        &self,
        event_id: i64,
        seat_type_id: i64,
        raw_label: &str,
        user_id: i64,
        additional_seconds: i64,
    ) -> Result<bool, ApiError> {
        let label = validation::parse_seat_label(raw_label)?;
        if additional_seconds <= 0 || additional_seconds > MAX_EXTEND_SECS {
            return Err(ApiError::Validation(format!(
                "additional_seconds must be between 1 and {}",
                MAX_EXTEND_SECS
            )));
        }

        let now = Utc::now().naive_utc();
        let label_str = label.as_str().to_string();

        let new_expires_at = db::transaction(&self.db, move |conn| {
            let current = Seat::find_by_label(conn, seat_type_id, &label_str)?;
            let Some(seat) = current else {
                return Ok(None);
            };
            if seat.status != seat::STATUS_LOCKED || seat.owner_user_id != user_id {
                return Ok(None);
            }

            let base = seat.expires_at.max(now);
            let new_expires_at = base + Duration::seconds(additional_seconds);
            let updated = Seat::extend_lock_of_holder(
                conn,
                seat_type_id,
                &label_str,
                user_id,
                new_expires_at,
            )?;
            Ok((updated == 1).then_some(new_expires_at))
        })
        .await?;

        let Some(new_expires_at) = new_expires_at else {
            return Ok(false);
        };

        let key = redis_pool::seat_lock_key(event_id, seat_type_id, label.as_str());
        let entry = SeatLockEntry {
            user_id,
            locked_at: now.and_utc().timestamp(),
            expires_at: new_expires_at.and_utc().timestamp(),
        };
        if let Err(e) =
            redis_pool::extend_seat_lock_if_holder(&self.redis, &key, user_id, &entry).await
        {
            tracing::warn!(error = %e, key = %key, "KV lock extension failed; TTL will lag the row");
        }

        Ok(true)
    }

    /// Fast-path lock lookup (KV is authoritative for freshness).
    pub async fn get(
        &self,
        event_id: i64,
        seat_type_id: i64,
        raw_label: &str,
    ) -> Result<Option<Lock>, ApiError> {
        let label = validation::parse_seat_label(raw_label)?;
        let key = redis_pool::seat_lock_key(event_id, seat_type_id, label.as_str());
        let entry = redis_pool::get_seat_lock(&self.redis, &key)
            .await
            .map_err(|e| ApiError::Internal(format!("seat lock store: {:#}", e)))?;
        Ok(entry.map(|e| lock_from_entry(event_id, seat_type_id, label.as_str(), &e)))
    }

    /// Batch lock lookup; the map carries None for free labels.
    pub async fn batch_get(
        &self,
        event_id: i64,
        seat_type_id: i64,
        raw_labels: &[String],
    ) -> Result<HashMap<String, Option<Lock>>, ApiError> {
        let mut labels = Vec::with_capacity(raw_labels.len());
        for raw in raw_labels {
            labels.push(validation::parse_seat_label(raw)?);
        }
        let keys: Vec<String> = labels
            .iter()
            .map(|l| redis_pool::seat_lock_key(event_id, seat_type_id, l.as_str()))
            .collect();

        let entries = redis_pool::batch_get_seat_locks(&self.redis, &keys)
            .await
            .map_err(|e| ApiError::Internal(format!("seat lock store: {:#}", e)))?;

        Ok(labels
            .into_iter()
            .zip(entries)
            .map(|(label, entry)| {
                let lock =
                    entry.map(|e| lock_from_entry(event_id, seat_type_id, label.as_str(), &e));
                (label.into_string(), lock)
            })
            .collect())
    }

    /// All fresh locks a user holds within an event (relational read; this
    /// feeds the booking-create page).
    pub async fn list_by_user(&self, event_id: i64, user_id: i64) -> Result<Vec<Lock>, ApiError> {
        let now = Utc::now().naive_utc();
        let seats = db::run(&self.db, move |conn| {
            Seat::list_locked_by_user(conn, event_id, user_id, now).map_err(ApiError::from)
        })
        .await?;

        Ok(seats
            .into_iter()
            .map(|s| Lock {
                event_id: s.event_id,
                seat_type_id: s.seat_type_id,
                seat_label: s.seat_label,
                user_id: s.owner_user_id,
                locked_at: s.locked_at,
                expires_at: s.expires_at,
            })
            .collect())
    }

    /// Event must be published with a future start date.
    async fn ensure_event_open(&self, event_id: i64) -> Result<(), ApiError> {
        let event = self.load_event_cached(event_id).await?;
        let now = Utc::now().naive_utc();
        if !event.is_open_for_sale(now) {
            return Err(ApiError::Conflict(
                "Event is not open for booking".to_string(),
            ));
        }
        Ok(())
    }

    async fn load_event_cached(&self, event_id: i64) -> Result<Event, ApiError> {
        match redis_pool::get_cached_event_json(&self.redis, event_id).await {
            Ok(Some(json)) => {
                if let Ok(event) = serde_json::from_str::<Event>(&json) {
                    return Ok(event);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, event_id, "event cache read failed");
            }
        }

        let event = db::run(&self.db, move |conn| {
            Event::find(conn, event_id).map_err(ApiError::from)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", event_id)))?;

        if let Ok(json) = serde_json::to_string(&event) {
            if let Err(e) = redis_pool::cache_event_json(&self.redis, event_id, &json).await {
                tracing::warn!(error = %e, event_id, "event cache populate failed");
            }
        }
        Ok(event)
    }
}

fn lock_from_entry(event_id: i64, seat_type_id: i64, label: &str, entry: &SeatLockEntry) -> Lock {
    Lock {
        event_id,
        seat_type_id,
        seat_label: label.to_string(),
        user_id: entry.user_id,
        locked_at: chrono::DateTime::from_timestamp(entry.locked_at, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default(),
        expires_at: chrono::DateTime::from_timestamp(entry.expires_at, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default(),
    }
}
