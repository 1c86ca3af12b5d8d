//! Telemetry initialization
//!
//! Structured logging via tracing-subscriber. The filter comes from
//! RUST_LOG; the default keeps actix and diesel at a sane volume.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard kept alive for the duration of the program.
pub struct TelemetryGuard;

/// Initialize the tracing subscriber.
pub fn init_telemetry() -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,actix_server=info,diesel=warn".into());

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(TelemetryGuard)
}
