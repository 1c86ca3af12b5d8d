pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod redis_pool;
pub mod schema;
pub mod services;
pub mod telemetry;
pub mod validation;
pub mod websocket;
