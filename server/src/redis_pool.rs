//! Redis connection pool and KV primitives
//!
//! Holds the atomic building blocks the lock manager, availability cache,
//! and token gate are built on: conditional set with TTL, holder-guarded
//! delete/extend (Lua), guarded counters, and a cursor scan for
//! maintenance. Authoritative state lives in Postgres; everything here is
//! a projection with a TTL.

use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::env;

pub type RedisPool = Pool;

/// Initialize Redis connection pool from environment
///
/// Expects REDIS_URL env var (e.g., "redis://127.0.0.1:6379").
/// Falls back to localhost if not set.
pub fn init_redis_pool() -> Result<RedisPool, anyhow::Error> {
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let cfg = Config::from_url(redis_url);
    let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

    tracing::info!("Redis pool initialized");
    Ok(pool)
}

/// Get a connection from the pool
pub async fn get_conn(pool: &RedisPool) -> Result<Connection, anyhow::Error> {
    let conn = pool.get().await?;
    Ok(conn)
}

// ============================================================================
// Key builders
// ============================================================================

pub fn seat_lock_key(event_id: i64, seat_type_id: i64, seat_label: &str) -> String {
    format!("seat_lock:{}:{}:{}", event_id, seat_type_id, seat_label)
}

pub fn avail_key(event_id: i64, seat_type_id: i64) -> String {
    format!("avail:{}:{}", event_id, seat_type_id)
}

pub fn event_cache_key(event_id: i64) -> String {
    format!("event:{}", event_id)
}

pub fn blacklist_key(token: &str) -> String {
    format!("blacklist:{}", token)
}

pub fn refresh_token_key(token: &str) -> String {
    format!("refresh_token:{}", token)
}

// ============================================================================
// Seat locks
// ============================================================================

/// Lock entry stored at `seat_lock:{event}:{type}:{label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatLockEntry {
    pub user_id: i64,
    pub locked_at: i64,
    pub expires_at: i64,
}

/// Create-if-absent with TTL. Returns false when another holder already has
/// the key (the fast-path conflict rejection).
pub async fn try_acquire_seat_lock(
    pool: &RedisPool,
    key: &str,
    entry: &SeatLockEntry,
    ttl_secs: u64,
) -> Result<bool, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let value = serde_json::to_string(entry)?;

    let outcome: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(&value)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async(&mut *conn)
        .await?;

    Ok(outcome.is_some())
}

/// Delete the lock only if `user_id` is the holder. Used for release and
/// for compensation when the relational write loses the race.
pub async fn delete_seat_lock_if_holder(
    pool: &RedisPool,
    key: &str,
    user_id: i64,
) -> Result<bool, anyhow::Error> {
    let script = redis::Script::new(
        r#"
        local v = redis.call('GET', KEYS[1])
        if not v then return 0 end
        local entry = cjson.decode(v)
        if tostring(entry.user_id) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        "#,
    );

    let mut conn = get_conn(pool).await?;
    let deleted: i64 = script
        .key(key)
        .arg(user_id.to_string())
        .invoke_async(&mut *conn)
        .await?;
    Ok(deleted == 1)
}

/// Rewrite the lock entry and move its expiry to an absolute Unix timestamp,
/// only if `user_id` is the holder.
pub async fn extend_seat_lock_if_holder(
    pool: &RedisPool,
    key: &str,
    user_id: i64,
    new_entry: &SeatLockEntry,
) -> Result<bool, anyhow::Error> {
    let script = redis::Script::new(
        r#"
        local v = redis.call('GET', KEYS[1])
        if not v then return 0 end
        local entry = cjson.decode(v)
        if tostring(entry.user_id) ~= ARGV[1] then return 0 end
        redis.call('SET', KEYS[1], ARGV[2], 'XX')
        redis.call('EXPIREAT', KEYS[1], ARGV[3])
        return 1
        "#,
    );

    let mut conn = get_conn(pool).await?;
    let value = serde_json::to_string(new_entry)?;
    let updated: i64 = script
        .key(key)
        .arg(user_id.to_string())
        .arg(&value)
        .arg(new_entry.expires_at)
        .invoke_async(&mut *conn)
        .await?;
    Ok(updated == 1)
}

pub async fn get_seat_lock(
    pool: &RedisPool,
    key: &str,
) -> Result<Option<SeatLockEntry>, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let value: Option<String> = conn.get(key).await?;
    match value {
        Some(json) => Ok(serde_json::from_str(&json).ok()),
        None => Ok(None),
    }
}

/// Batch lookup; result aligns with the input key order.
pub async fn batch_get_seat_locks(
    pool: &RedisPool,
    keys: &[String],
) -> Result<Vec<Option<SeatLockEntry>>, anyhow::Error> {
    if keys.is_empty() {
        return Ok(vec![]);
    }
    let mut conn = get_conn(pool).await?;
    let values: Vec<Option<String>> = redis::cmd("MGET")
        .arg(keys)
        .query_async(&mut *conn)
        .await?;
    Ok(values
        .into_iter()
        .map(|v| v.and_then(|json| serde_json::from_str(&json).ok()))
        .collect())
}

// ============================================================================
// Availability counters
// ============================================================================

const AVAIL_TTL_SECS: u64 = 60;

/// Seed (or refresh) a counter from its authoritative DB value.
pub async fn set_counter(pool: &RedisPool, key: &str, value: i64) -> Result<(), anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    conn.set_ex::<_, _, ()>(key, value, AVAIL_TTL_SECS).await?;
    Ok(())
}

pub async fn get_counter(pool: &RedisPool, key: &str) -> Result<Option<i64>, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let value: Option<i64> = conn.get(key).await?;
    Ok(value)
}

/// Decrement only when the key is populated; a result that would cross zero
/// is clamped to zero. Returns the new value, or None on a cache miss.
pub async fn decrement_counter_clamped(
    pool: &RedisPool,
    key: &str,
) -> Result<Option<i64>, anyhow::Error> {
    let script = redis::Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then return false end
        local n = redis.call('DECR', KEYS[1])
        if n < 0 then
            redis.call('SET', KEYS[1], '0', 'KEEPTTL')
            return 0
        end
        return n
        "#,
    );

    let mut conn = get_conn(pool).await?;
    let value: Option<i64> = script.key(key).invoke_async(&mut *conn).await?;
    Ok(value)
}

/// Increment only when the key is populated (a missing key would otherwise
/// resurrect as a bogus 1). Returns the new value, or None on a cache miss.
pub async fn increment_counter(
    pool: &RedisPool,
    key: &str,
    by: i64,
) -> Result<Option<i64>, anyhow::Error> {
    let script = redis::Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then return false end
        return redis.call('INCRBY', KEYS[1], ARGV[1])
        "#,
    );

    let mut conn = get_conn(pool).await?;
    let value: Option<i64> = script.key(key).arg(by).invoke_async(&mut *conn).await?;
    Ok(value)
}

pub async fn delete_keys(pool: &RedisPool, keys: &[String]) -> Result<(), anyhow::Error> {
    if keys.is_empty() {
        return Ok(());
    }
    let mut conn = get_conn(pool).await?;
    redis::cmd("DEL")
        .arg(keys)
        .query_async::<_, ()>(&mut *conn)
        .await?;
    Ok(())
}

// ============================================================================
// Event details cache
// ============================================================================

const EVENT_CACHE_TTL_SECS: u64 = 60;

pub async fn cache_event_json(
    pool: &RedisPool,
    event_id: i64,
    json: &str,
) -> Result<(), anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    conn.set_ex::<_, _, ()>(event_cache_key(event_id), json, EVENT_CACHE_TTL_SECS)
        .await?;
    Ok(())
}

pub async fn get_cached_event_json(
    pool: &RedisPool,
    event_id: i64,
) -> Result<Option<String>, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let value: Option<String> = conn.get(event_cache_key(event_id)).await?;
    Ok(value)
}

// ============================================================================
// Token cache (blacklist + refresh)
// ============================================================================

/// Cached refresh-token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshEntry {
    pub user_id: i64,
    pub revoked: bool,
    pub expires_at: i64,
}

pub async fn set_blacklisted(
    pool: &RedisPool,
    token: &str,
    ttl_secs: u64,
) -> Result<(), anyhow::Error> {
    if ttl_secs == 0 {
        return Ok(());
    }
    let mut conn = get_conn(pool).await?;
    conn.set_ex::<_, _, ()>(blacklist_key(token), 1i64, ttl_secs)
        .await?;
    Ok(())
}

pub async fn is_blacklisted_cached(pool: &RedisPool, token: &str) -> Result<bool, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let exists: bool = conn.exists(blacklist_key(token)).await?;
    Ok(exists)
}

pub async fn cache_refresh_entry(
    pool: &RedisPool,
    token: &str,
    entry: &RefreshEntry,
    ttl_secs: u64,
) -> Result<(), anyhow::Error> {
    if ttl_secs == 0 {
        return Ok(());
    }
    let mut conn = get_conn(pool).await?;
    let value = serde_json::to_string(entry)?;
    conn.set_ex::<_, _, ()>(refresh_token_key(token), value, ttl_secs)
        .await?;
    Ok(())
}

pub async fn get_refresh_entry(
    pool: &RedisPool,
    token: &str,
) -> Result<Option<RefreshEntry>, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let value: Option<String> = conn.get(refresh_token_key(token)).await?;
    match value {
        Some(json) => Ok(serde_json::from_str(&json).ok()),
        None => Ok(None),
    }
}

// ============================================================================
// Maintenance scan
// ============================================================================

/// Cursor-scan for keys matching `pattern` that carry no TTL. Redis TTLs
/// normally expire these on their own; the sweeper calls this to catch keys
/// that slipped through (expected count: zero).
pub async fn scan_keys_without_ttl(
    pool: &RedisPool,
    pattern: &str,
) -> Result<Vec<String>, anyhow::Error> {
    let mut conn = get_conn(pool).await?;
    let mut stale = Vec::new();
    let mut cursor: u64 = 0;

    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(&mut *conn)
            .await?;

        for key in keys {
            let ttl: i64 = conn.ttl(&key).await?;
            if ttl == -1 {
                stale.push(key);
            }
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(seat_lock_key(7, 3, "V1"), "seat_lock:7:3:V1");
        assert_eq!(avail_key(7, 3), "avail:7:3");
        assert_eq!(blacklist_key("abc"), "blacklist:abc");
        assert_eq!(refresh_token_key("abc"), "refresh_token:abc");
    }

    #[test]
    fn lock_entry_round_trip() {
        let entry = SeatLockEntry {
            user_id: 42,
            locked_at: 1_700_000_000,
            expires_at: 1_700_000_600,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: SeatLockEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn conditional_set_is_exclusive() {
        let pool = init_redis_pool().unwrap();
        let key = seat_lock_key(999_001, 1, "T1");
        let entry = SeatLockEntry {
            user_id: 1,
            locked_at: 0,
            expires_at: 600,
        };

        let first = try_acquire_seat_lock(&pool, &key, &entry, 5).await.unwrap();
        let second = try_acquire_seat_lock(&pool, &key, &entry, 5).await.unwrap();
        assert!(first);
        assert!(!second);

        // Only the holder may delete.
        assert!(!delete_seat_lock_if_holder(&pool, &key, 2).await.unwrap());
        assert!(delete_seat_lock_if_holder(&pool, &key, 1).await.unwrap());
    }
}
