//! Booking endpoints
//!
//! Thin translation layer: parse and authenticate, call the coordinator,
//! map `ApiError` onto the wire. Confirmation has no endpoint here; the
//! payment webhook is the only path to `confirmed`.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::middleware::authed_user;
use crate::models::ticket::{aggregate_status, Ticket};
use crate::models::booking_seat::BookingSeat;
use crate::services::booking::{BookingCoordinator, SeatSelection};
use crate::services::ticket_generator::TicketGenerator;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub event_id: i64,
    pub seat_details: Vec<SeatSelection>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MyBookingsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn create_booking(
    req: HttpRequest,
    coordinator: web::Data<BookingCoordinator>,
    body: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let body = body.into_inner();
    let view = coordinator
        .create_booking(None, body.event_id, user.0, body.seat_details)
        .await?;
    Ok(HttpResponse::Created().json(view))
}

pub async fn my_bookings(
    req: HttpRequest,
    coordinator: web::Data<BookingCoordinator>,
    query: web::Query<MyBookingsQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let query = query.into_inner();
    let bookings = coordinator
        .list_user_bookings(user.0, query.status, query.limit, query.offset)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "bookings": bookings,
        "limit": query.limit.clamp(1, 100),
        "offset": query.offset.max(0),
    })))
}

pub async fn get_booking(
    req: HttpRequest,
    coordinator: web::Data<BookingCoordinator>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let view = coordinator.get_booking(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn cancel_booking(
    req: HttpRequest,
    coordinator: web::Data<BookingCoordinator>,
    path: web::Path<i64>,
    body: web::Json<CancelBookingRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let body = body.into_inner();

    // The key may come in the body or the conventional header.
    let key = body.idempotency_key.or_else(|| {
        req.headers()
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    });

    let response = coordinator
        .cancel_booking(None, path.into_inner(), user.0, body.reason, key)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn booking_tickets(
    req: HttpRequest,
    coordinator: web::Data<BookingCoordinator>,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let booking_id = path.into_inner();

    // Ownership (or organizer) check rides on the booking read.
    coordinator.get_booking(booking_id, user.0).await?;

    let (tickets, expected) = db::run(pool.get_ref(), move |conn| {
        let tickets = Ticket::list_for_booking(conn, booking_id)?;
        let expected = BookingSeat::seat_ids_for_booking(conn, booking_id)?.len();
        Ok((tickets, expected))
    })
    .await?;

    let status = aggregate_status(&tickets, expected);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tickets": tickets,
        "status": status,
    })))
}

pub async fn ticket_job_status(
    req: HttpRequest,
    generator: web::Data<TicketGenerator>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    authed_user(&req)?;
    let job_id = path.into_inner();
    match generator.get_job_status(&job_id) {
        Some(status) => Ok(HttpResponse::Ok().json(status)),
        None => Err(ApiError::NotFound(format!("Job {} not found", job_id))),
    }
}

pub fn configure_booking_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/bookings")
            .route("/create", web::post().to(create_booking))
            .route("/my-bookings", web::get().to(my_bookings))
            .route("/ticket-status/{job_id}", web::get().to(ticket_job_status))
            .route("/{id}", web::get().to(get_booking))
            .route("/{id}/cancel", web::post().to(cancel_booking))
            .route("/{id}/tickets", web::get().to(booking_tickets)),
    );
}
