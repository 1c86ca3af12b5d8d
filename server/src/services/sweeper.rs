//! Expiry sweeper
//!
//! Returns the system to consistency when holders walk away. Two cadences
//! share one task: expired locks every five minutes, token/key hygiene
//! every hour. Runs with concurrency 1 and a minimum spacing between
//! executions so overloaded clusters are not piled on.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::SweeperConfig;
use crate::db::{self, DbPool};
use crate::models::idempotency::IdempotencyKey;
use crate::models::{BlacklistedToken, Booking, RefreshToken, SeatType};
use crate::models::seat::Seat;
use crate::redis_pool::{self, RedisPool};
use crate::services::availability::AvailabilityCache;

pub struct ExpirySweeper {
    db: DbPool,
    redis: RedisPool,
    availability: Arc<AvailabilityCache>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        db: DbPool,
        redis: RedisPool,
        availability: Arc<AvailabilityCache>,
        config: SweeperConfig,
    ) -> Arc<Self> {
        info!(
            lock_interval_secs = config.lock_sweep_interval.as_secs(),
            token_interval_secs = config.token_sweep_interval.as_secs(),
            "ExpirySweeper initialized"
        );
        Arc::new(Self {
            db,
            redis,
            availability,
            config,
        })
    }

    /// Run forever. Both sweeps are deterministic and idempotent, so a
    /// failed tick is just retried on the next one.
    pub async fn start(self: Arc<Self>) {
        let mut lock_timer = interval(self.config.lock_sweep_interval);
        let mut token_timer = interval(self.config.token_sweep_interval);
        let mut last_run: Option<Instant> = None;

        info!("Starting expiry sweep loop");

        loop {
            tokio::select! {
                _ = lock_timer.tick() => {
                    if self.rate_capped(&mut last_run) {
                        continue;
                    }
                    if let Err(e) = self.sweep_expired_locks().await {
                        error!(error = %format!("{:#}", e), "expired-lock sweep failed");
                    }
                }
                _ = token_timer.tick() => {
                    if self.rate_capped(&mut last_run) {
                        continue;
                    }
                    if let Err(e) = self.sweep_tokens().await {
                        error!(error = %format!("{:#}", e), "token sweep failed");
                    }
                }
            }
        }
    }

    fn rate_capped(&self, last_run: &mut Option<Instant>) -> bool {
        if let Some(last) = last_run {
            if last.elapsed() < self.config.min_run_interval {
                return true;
            }
        }
        *last_run = Some(Instant::now());
        false
    }

    /// Expired pending bookings become cancelled, then every expired lock
    /// row is deleted and its availability restored. KV lock keys normally
    /// expire on their own TTL; leftovers are removed opportunistically.
    pub async fn sweep_expired_locks(&self) -> Result<(), anyhow::Error> {
        let (cancelled, reclaimed) = db::transaction(&self.db, move |conn| {
            let now = Utc::now().naive_utc();

            let cancelled = Booking::cancel_expired_pending(conn, now)?;
            let reclaimed = Seat::delete_expired_locks(conn, now)?;

            let mut per_type: HashMap<i64, (i64, i32)> = HashMap::new();
            for (seat_type_id, event_id, _label) in &reclaimed {
                let entry = per_type.entry(*seat_type_id).or_insert((*event_id, 0));
                entry.1 += 1;
            }
            for (seat_type_id, (_event, count)) in &per_type {
                SeatType::restore(conn, *seat_type_id, *count)?;
            }

            Ok((cancelled.len(), reclaimed))
        })
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

        if cancelled == 0 && reclaimed.is_empty() {
            return Ok(());
        }

        info!(
            cancelled_bookings = cancelled,
            reclaimed_seats = reclaimed.len(),
            "expired locks swept"
        );

        // Drop the stale projections for every touched (event, type) pair.
        let mut touched: HashMap<(i64, i64), ()> = HashMap::new();
        let mut lock_keys = Vec::with_capacity(reclaimed.len());
        for (seat_type_id, event_id, label) in &reclaimed {
            touched.insert((*event_id, *seat_type_id), ());
            lock_keys.push(redis_pool::seat_lock_key(*event_id, *seat_type_id, label));
        }
        for (event_id, seat_type_id) in touched.keys() {
            self.availability.invalidate(*event_id, *seat_type_id).await;
        }
        if let Err(e) = redis_pool::delete_keys(&self.redis, &lock_keys).await {
            tracing::warn!(error = %e, "stale lock key removal failed");
        }

        // Anything matching the lock pattern without a TTL slipped past the
        // normal write path; remove it.
        match redis_pool::scan_keys_without_ttl(&self.redis, "seat_lock:*").await {
            Ok(stale) if !stale.is_empty() => {
                tracing::warn!(count = stale.len(), "lock keys found without TTL");
                let _ = redis_pool::delete_keys(&self.redis, &stale).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "lock key scan failed"),
        }

        Ok(())
    }

    /// Hourly hygiene: expired token rows, expired idempotency keys, and
    /// any token cache keys Redis TTL missed (expected: none).
    pub async fn sweep_tokens(&self) -> Result<(), anyhow::Error> {
        let (blacklisted, refresh, idempotency) = db::run(&self.db, move |conn| {
            let now = Utc::now().naive_utc();
            let blacklisted = BlacklistedToken::delete_expired(conn, now)?;
            let refresh = RefreshToken::delete_expired(conn, now)?;
            let idempotency = IdempotencyKey::delete_expired(conn, now)?;
            Ok((blacklisted, refresh, idempotency))
        })
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

        info!(
            blacklisted_deleted = blacklisted,
            refresh_deleted = refresh,
            idempotency_deleted = idempotency,
            "token sweep complete"
        );

        for pattern in ["blacklist:*", "refresh_token:*"] {
            match redis_pool::scan_keys_without_ttl(&self.redis, pattern).await {
                Ok(stale) if !stale.is_empty() => {
                    tracing::warn!(pattern, count = stale.len(), "token keys found without TTL");
                    let _ = redis_pool::delete_keys(&self.redis, &stale).await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, pattern, "token key scan failed"),
            }
        }

        Ok(())
    }
}
