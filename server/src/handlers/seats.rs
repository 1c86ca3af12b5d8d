//! Seat lock and seat-type endpoints

use actix_web::{web, HttpRequest, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::authed_user;
use crate::services::availability::AvailabilityCache;
use crate::services::seat_lock::SeatLockManager;
use crate::services::seat_types::SeatTypeService;

#[derive(Debug, Deserialize)]
pub struct SeatLabelRequest {
    pub seat_label: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendLockRequest {
    pub seat_label: String,
    pub additional_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct LockStatusQuery {
    /// Comma-separated labels, e.g. `labels=V1,V2,A10`.
    pub labels: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSeatTypeRequest {
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSeatTypeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<i32>,
}

pub async fn lock_seat(
    req: HttpRequest,
    locks: web::Data<SeatLockManager>,
    path: web::Path<(i64, i64)>,
    body: web::Json<SeatLabelRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let (event_id, seat_type_id) = path.into_inner();
    let lock = locks
        .acquire(None, event_id, seat_type_id, &body.seat_label, user.0)
        .await?;
    Ok(HttpResponse::Created().json(lock))
}

pub async fn release_seat(
    req: HttpRequest,
    locks: web::Data<SeatLockManager>,
    path: web::Path<(i64, i64)>,
    body: web::Json<SeatLabelRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let (event_id, seat_type_id) = path.into_inner();
    let released = locks
        .release(None, event_id, seat_type_id, &body.seat_label, user.0)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "released": released })))
}

pub async fn extend_lock(
    req: HttpRequest,
    locks: web::Data<SeatLockManager>,
    path: web::Path<(i64, i64)>,
    body: web::Json<ExtendLockRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let (event_id, seat_type_id) = path.into_inner();
    let extended = locks
        .extend(
            event_id,
            seat_type_id,
            &body.seat_label,
            user.0,
            body.additional_seconds,
        )
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "extended": extended })))
}

/// Batch lock status for a label list (seat-map rendering).
pub async fn lock_status(
    locks: web::Data<SeatLockManager>,
    path: web::Path<(i64, i64)>,
    query: web::Query<LockStatusQuery>,
) -> Result<HttpResponse, ApiError> {
    let (event_id, seat_type_id) = path.into_inner();
    let labels: Vec<String> = query
        .labels
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if labels.is_empty() {
        return Err(ApiError::Validation("labels query is required".to_string()));
    }
    let statuses = locks.batch_get(event_id, seat_type_id, &labels).await?;
    Ok(HttpResponse::Ok().json(statuses))
}

pub async fn my_locks(
    req: HttpRequest,
    locks: web::Data<SeatLockManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let held = locks.list_by_user(path.into_inner(), user.0).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "locks": held })))
}

pub async fn availability(
    cache: web::Data<AvailabilityCache>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, ApiError> {
    let (event_id, seat_type_id) = path.into_inner();
    let available = cache.get(event_id, seat_type_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "event_id": event_id,
        "seat_type_id": seat_type_id,
        "available_quantity": available,
    })))
}

pub async fn list_seat_types(
    service: web::Data<SeatTypeService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let seat_types = service.list(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "seat_types": seat_types })))
}

pub async fn create_seat_type(
    req: HttpRequest,
    service: web::Data<SeatTypeService>,
    path: web::Path<i64>,
    body: web::Json<CreateSeatTypeRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let body = body.into_inner();
    let created = service
        .create(
            None,
            path.into_inner(),
            user.0,
            body.name,
            body.price,
            body.quantity,
        )
        .await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_seat_type(
    req: HttpRequest,
    service: web::Data<SeatTypeService>,
    path: web::Path<(i64, i64)>,
    body: web::Json<UpdateSeatTypeRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let (event_id, seat_type_id) = path.into_inner();
    let body = body.into_inner();
    let updated = service
        .update(
            None,
            event_id,
            seat_type_id,
            user.0,
            body.name,
            body.price,
            body.quantity,
        )
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn delete_seat_type(
    req: HttpRequest,
    service: web::Data<SeatTypeService>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, ApiError> {
    let user = authed_user(&req)?;
    let (event_id, seat_type_id) = path.into_inner();
    service.delete(None, event_id, seat_type_id, user.0).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure_seat_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/seats")
            .route("/{event_id}/my-locks", web::get().to(my_locks))
            .route("/{event_id}/seat-types", web::get().to(list_seat_types))
            .route("/{event_id}/seat-types", web::post().to(create_seat_type))
            .route(
                "/{event_id}/seat-types/{seat_type_id}",
                web::put().to(update_seat_type),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}",
                web::delete().to(delete_seat_type),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}/lock",
                web::post().to(lock_seat),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}/release",
                web::post().to(release_seat),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}/extend",
                web::post().to(extend_lock),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}/locks",
                web::get().to(lock_status),
            )
            .route(
                "/{event_id}/seat-types/{seat_type_id}/availability",
                web::get().to(availability),
            ),
    );
}
