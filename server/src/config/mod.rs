//! Environment configuration
//!
//! Every subsystem gets a small config struct with a `from_env()`
//! constructor. Secrets hard-fail at startup when missing or still set to
//! placeholder values; optional provider credentials merely disable their
//! sub-features.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Values that indicate a copied-from-template .env file.
const PLACEHOLDER_MARKERS: &[&str] = &["changeme", "your-", "xxx", "example"];

fn required_secret(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{} must be set", name))?;
    let lower = value.to_lowercase();
    if value.is_empty() || PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
        bail!("{} is empty or still a placeholder value", name);
    }
    Ok(value)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub redis_url: String,
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = required_secret("DATABASE_URL")?;
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            redis_url,
            bind_addr,
            cors_origins,
        })
    }
}

/// Identity boundary configuration. The core only verifies tokens; issuance
/// lives elsewhere.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            jwt_secret: required_secret("JWT_SECRET")?,
            jwt_refresh_secret: required_secret("JWT_REFRESH_SECRET")?,
        })
    }
}

/// Payment provider credentials and endpoints.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub api_base: String,
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            key_id: required_secret("PAYMENT_KEY_ID")?,
            key_secret: required_secret("PAYMENT_KEY_SECRET")?,
            webhook_secret: required_secret("PAYMENT_WEBHOOK_SECRET")?,
            api_base: env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
        })
    }
}

/// Seat lock timing.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Soft lock lifetime (seconds); both the KV TTL and the row expires_at.
    pub lock_ttl_secs: u64,
    /// End-to-end deadline for a single acquire.
    pub acquire_deadline: Duration,
}

impl LockConfig {
    pub fn from_env() -> Self {
        Self {
            lock_ttl_secs: env_u64("SEAT_LOCK_TTL_SECS", 600),
            acquire_deadline: Duration::from_secs(env_u64("SEAT_LOCK_DEADLINE_SECS", 5)),
        }
    }
}

/// Booking coordinator timing.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Payment window granted to a pending booking.
    pub payment_window_secs: u64,
    pub create_deadline: Duration,
    pub confirm_deadline: Duration,
}

impl BookingConfig {
    pub fn from_env() -> Self {
        Self {
            payment_window_secs: env_u64("BOOKING_PAYMENT_WINDOW_SECS", 900),
            create_deadline: Duration::from_secs(env_u64("BOOKING_CREATE_DEADLINE_SECS", 15)),
            confirm_deadline: Duration::from_secs(env_u64("BOOKING_CONFIRM_DEADLINE_SECS", 30)),
        }
    }
}

/// Background sweeper cadence.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub lock_sweep_interval: Duration,
    pub token_sweep_interval: Duration,
    /// Minimum spacing between sweep executions, regardless of schedule.
    pub min_run_interval: Duration,
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        Self {
            lock_sweep_interval: Duration::from_secs(env_u64("LOCK_SWEEP_INTERVAL_SECS", 300)),
            token_sweep_interval: Duration::from_secs(env_u64("TOKEN_SWEEP_INTERVAL_SECS", 3600)),
            min_run_interval: Duration::from_secs(env_u64("SWEEP_MIN_INTERVAL_SECS", 30)),
        }
    }
}

/// Ticket generation worker pool settings.
#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub worker_concurrency: usize,
    /// Completed jobs retained for status queries.
    pub completed_retention: usize,
    /// Failed jobs retained for forensics.
    pub failed_retention: usize,
}

impl TicketConfig {
    pub fn from_env() -> Self {
        Self {
            worker_concurrency: env_u64("TICKET_WORKER_CONCURRENCY", 3).max(1) as usize,
            completed_retention: env_u64("TICKET_COMPLETED_RETENTION", 200) as usize,
            failed_retention: env_u64("TICKET_FAILED_RETENTION", 500) as usize,
        }
    }
}

/// Optional delivery provider credentials. Absence disables the sub-jobs.
#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    pub email_api_key: Option<String>,
    pub email_from: Option<String>,
    pub sms_api_key: Option<String>,
    pub sms_from: Option<String>,
}

impl DeliveryConfig {
    pub fn from_env() -> Self {
        Self {
            email_api_key: env::var("EMAIL_API_KEY").ok().filter(|v| !v.is_empty()),
            email_from: env::var("EMAIL_FROM").ok().filter(|v| !v.is_empty()),
            sms_api_key: env::var("SMS_API_KEY").ok().filter(|v| !v.is_empty()),
            sms_from: env::var("SMS_FROM").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn email_enabled(&self) -> bool {
        self.email_api_key.is_some()
    }

    pub fn sms_enabled(&self) -> bool {
        self.sms_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_values_rejected() {
        env::set_var("TEST_SECRET_A", "your-key-here");
        assert!(required_secret("TEST_SECRET_A").is_err());
        env::set_var("TEST_SECRET_A", "");
        assert!(required_secret("TEST_SECRET_A").is_err());
        env::set_var("TEST_SECRET_A", "rzp_live_8f3a2b");
        assert_eq!(required_secret("TEST_SECRET_A").unwrap(), "rzp_live_8f3a2b");
        env::remove_var("TEST_SECRET_A");
    }

    #[test]
    fn defaults_apply_without_env() {
        env::remove_var("SEAT_LOCK_TTL_SECS");
        let cfg = LockConfig::from_env();
        assert_eq!(cfg.lock_ttl_secs, 600);
        assert_eq!(cfg.acquire_deadline, Duration::from_secs(5));
    }
}
