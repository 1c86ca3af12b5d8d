//! Database connection pool and blocking-query helpers
//!
//! Diesel is synchronous; every query runs on the blocking thread pool via
//! `tokio::task::spawn_blocking`. Row locks are held only for the duration
//! of a single closure passed to [`run`] or [`transaction`].

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};

use crate::error::ApiError;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type DbConn = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Create the PostgreSQL connection pool.
///
/// Sized for parallel lock/booking traffic plus background workers; row
/// locks in the hot paths are short-lived, so 30 connections is generous.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(30)
        .connection_timeout(std::time::Duration::from_secs(30))
        .build(manager)
        .context("Failed to create database connection pool")?;

    Ok(pool)
}

/// Run a blocking diesel closure on a pooled connection.
pub async fn run<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

/// Run a blocking diesel closure inside a single transaction.
///
/// The closure's `ApiError` aborts and propagates; nothing partial is ever
/// committed.
pub async fn transaction<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        conn.transaction(|conn| f(conn))
    })
    .await?
}
