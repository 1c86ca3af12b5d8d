//! Composition root
//!
//! Constructs every collaborator once (pools, caches, services, the
//! broadcaster) and threads the handles through the HTTP app. No module
//! holds ambient global state; shutdown is the reverse of construction.

use actix::Actor;
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, Error, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use server::config::{
    AuthConfig, BookingConfig, DeliveryConfig, LockConfig, PaymentConfig, ServerConfig,
    SweeperConfig, TicketConfig,
};
use server::db::create_pool;
use server::handlers::{bookings, health, payments, seats};
use server::middleware::{auth::verify_access_token, Correlate, RequireAuth};
use server::redis_pool::init_redis_pool;
use server::services::availability::AvailabilityCache;
use server::services::booking::BookingCoordinator;
use server::services::idempotency::IdempotencyStore;
use server::services::payments::PaymentIntake;
use server::services::seat_lock::SeatLockManager;
use server::services::seat_types::SeatTypeService;
use server::services::sweeper::ExpirySweeper;
use server::services::ticket_generator::TicketGenerator;
use server::services::token_gate::TokenGate;
use server::websocket::{
    BroadcastServer, ConnectionManager, SessionServices, WsEventBus, WsSession,
};

async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    srv: web::Data<actix::Addr<BroadcastServer>>,
    conn_mgr: web::Data<ConnectionManager>,
    gate: web::Data<TokenGate>,
    auth_config: web::Data<AuthConfig>,
    services: web::Data<SessionServices>,
) -> Result<HttpResponse, Error> {
    // Optional identity: token in query string or Authorization header.
    // Anonymous connections are receive-only.
    let token = req
        .query_string()
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_owned)
        .or_else(|| {
            req.headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(server::middleware::auth::bearer_token)
                .map(str::to_owned)
        });

    let user_id = match token {
        Some(token) => {
            match verify_access_token(gate.get_ref(), &auth_config.jwt_secret, &token).await {
                Ok(user_id) => Some(user_id),
                Err(e) => {
                    warn!(error = %e, "websocket handshake with invalid token");
                    return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
                        "code": e.code(),
                        "message": "Invalid or revoked token",
                    })));
                }
            }
        }
        None => None,
    };

    if let Err(reason) = conn_mgr.try_acquire(user_id) {
        warn!(user_id = ?user_id, %reason, "websocket connection rejected");
        return Ok(HttpResponse::TooManyRequests().json(serde_json::json!({
            "code": "RATE_LIMITED",
            "message": reason,
        })));
    }

    ws::start(
        WsSession {
            id: Uuid::new_v4(),
            user_id,
            hb: Instant::now(),
            server: srv.get_ref().clone(),
            conn_mgr: conn_mgr.clone(),
            services: services.get_ref().clone(),
        },
        &req,
        stream,
    )
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _telemetry_guard =
        server::telemetry::init_telemetry().context("Failed to initialize telemetry")?;

    info!("Starting boxoffice booking engine");

    // Configuration: secrets hard-fail here, before any store is touched.
    let server_config = ServerConfig::from_env().context("server configuration")?;
    let auth_config = AuthConfig::from_env().context("auth configuration")?;
    let payment_config = PaymentConfig::from_env().context("payment configuration")?;
    let lock_config = LockConfig::from_env();
    let booking_config = BookingConfig::from_env();
    let sweeper_config = SweeperConfig::from_env();
    let ticket_config = TicketConfig::from_env();
    let delivery_config = DeliveryConfig::from_env();

    // Stores.
    let pool = create_pool(&server_config.database_url)
        .context("Failed to create database connection pool")?;
    info!("Database connection pool created (max 30 connections)");

    let redis = init_redis_pool().context("Failed to initialize Redis pool")?;

    // Broadcaster first: it is the bus every service publishes into.
    let broadcast_server = BroadcastServer::default().start();
    let bus = WsEventBus::new(broadcast_server.clone());

    // Services, leaves first.
    let availability = AvailabilityCache::new(pool.clone(), redis.clone());
    let idempotency = IdempotencyStore::new(pool.clone());
    let token_gate = TokenGate::new(pool.clone(), redis.clone());

    let seat_locks = SeatLockManager::new(
        pool.clone(),
        redis.clone(),
        availability.clone(),
        bus.clone(),
        lock_config,
    );

    let ticket_generator = TicketGenerator::new(
        pool.clone(),
        bus.clone(),
        ticket_config,
        delivery_config.clone(),
    );
    ticket_generator.start_workers().await;

    let coordinator = BookingCoordinator::new(
        pool.clone(),
        availability.clone(),
        idempotency.clone(),
        ticket_generator.clone(),
        bus.clone(),
        booking_config,
    );

    let payment_intake = PaymentIntake::new(pool.clone(), coordinator.clone(), payment_config);

    let seat_type_service =
        SeatTypeService::new(pool.clone(), availability.clone(), bus.clone());

    // Background maintenance.
    let sweeper = ExpirySweeper::new(
        pool.clone(),
        redis.clone(),
        availability.clone(),
        sweeper_config,
    );
    tokio::spawn(sweeper.start());
    info!("ExpirySweeper background service started");

    let conn_mgr = web::Data::new(ConnectionManager::default());
    info!("WebSocket ConnectionManager initialized (3 per user, 1000 global)");

    let session_services = SessionServices {
        seat_locks: seat_locks.clone(),
        bookings: coordinator.clone(),
    };

    let cors_origins = server_config.cors_origins.clone();
    let jwt_secret = auth_config.jwt_secret.clone();
    let bind_addr = server_config.bind_addr.clone();

    let auth_data = web::Data::new(auth_config);
    let ticket_generator_for_shutdown = ticket_generator.clone();

    info!("Starting HTTP server on http://{}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::AUTHORIZATION,
                    actix_web::http::header::CONTENT_TYPE,
                    actix_web::http::header::ACCEPT,
                ])
                .allowed_header("X-Request-ID")
                .allowed_header("Idempotency-Key")
                .max_age(3600)
        } else {
            let mut cors = Cors::default();
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::AUTHORIZATION,
                    actix_web::http::header::CONTENT_TYPE,
                    actix_web::http::header::ACCEPT,
                ])
                .allowed_header("X-Request-ID")
                .allowed_header("Idempotency-Key")
                .max_age(3600)
        };

        App::new()
            .wrap(cors)
            .wrap(Correlate)
            .wrap(Logger::default())
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::from(availability.clone()))
            .app_data(web::Data::from(seat_locks.clone()))
            .app_data(web::Data::from(coordinator.clone()))
            .app_data(web::Data::from(payment_intake.clone()))
            .app_data(web::Data::from(seat_type_service.clone()))
            .app_data(web::Data::from(ticket_generator.clone()))
            .app_data(web::Data::from(token_gate.clone()))
            .app_data(web::Data::new(broadcast_server.clone()))
            .app_data(web::Data::new(session_services.clone()))
            .app_data(auth_data.clone())
            .app_data(conn_mgr.clone())
            .app_data(
                web::JsonConfig::default()
                    .limit(1024 * 1024)
                    .error_handler(|err, req| {
                        let detail = err.to_string();
                        let path = req.path().to_string();
                        tracing::warn!(path = %path, error = %detail, "JSON parse error");
                        actix_web::error::InternalError::from_response(
                            err,
                            HttpResponse::BadRequest().json(serde_json::json!({
                                "code": "VALIDATION",
                                "message": format!("Invalid JSON body: {}", detail),
                            })),
                        )
                        .into()
                    }),
            )
            .route("/api/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(ws_route))
            .service(
                web::scope("/api/v1")
                    // Raw-body endpoint, deliberately outside auth: the
                    // signature over the bytes is its authentication.
                    .service(
                        web::resource("/payments/webhook")
                            .route(web::post().to(payments::webhook)),
                    )
                    .service(
                        web::scope("")
                            .wrap(RequireAuth::new(token_gate.clone(), jwt_secret.clone()))
                            .configure(bookings::configure_booking_routes)
                            .configure(payments::configure_payment_routes)
                            .configure(seats::configure_seat_routes),
                    ),
            )
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind to {}", bind_addr))?
    .shutdown_timeout(10)
    .run();

    let handle = server.handle();
    let server_task = tokio::spawn(server);

    // SIGTERM/SIGINT: stop accepting, drain for up to 10 s, stop workers
    // after their current job, then drop the pools.
    shutdown_signal().await;
    info!("Shutdown signal received; draining");

    ticket_generator_for_shutdown.shutdown();
    handle.stop(true).await;

    match server_task.await {
        Ok(result) => result.context("HTTP server error")?,
        Err(e) => warn!(error = %e, "server task join failed"),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
