//! Booking coordinator
//!
//! Turns a set of held locks into a `pending` booking, then into a
//! `confirmed` one on verified payment, or cancels and releases on request
//! or timeout. Every transition happens inside one relational transaction;
//! race losers get `STALE` or `CONFLICT` and are expected to re-lock.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bus::{BusEvent, EventBus, Origin};
use crate::config::BookingConfig;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::booking::{self, generate_reference, Booking, NewBooking};
use crate::models::booking_seat::{BookingSeat, NewBookingSeat};
use crate::models::seat::{self, Seat};
use crate::models::ticket::Ticket;
use crate::models::SeatType;
use crate::schema::seats;
use crate::services::availability::AvailabilityCache;
use crate::services::idempotency::{Claim, IdempotencyStore};
use crate::services::ticket_generator::{TicketGenerator, TicketSeed};
use crate::validation;

/// One requested seat in a booking-create call.
#[derive(Debug, Clone, Deserialize)]
pub struct SeatSelection {
    pub seat_label: String,
    pub seat_type_id: i64,
}

/// Booking plus its linked seats, as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub seats: Vec<BookedSeatView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookedSeatView {
    pub seat_id: i64,
    pub seat_type_id: i64,
    pub seat_label: String,
    pub status: String,
    pub price_paid: Decimal,
}

/// Result of a confirmation. Tickets are present only when the queue was
/// unavailable and generation ran inline.
#[derive(Debug, Serialize)]
pub struct Confirmation {
    #[serde(flatten)]
    pub booking: Booking,
    pub already_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tickets: Option<Vec<Ticket>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_job_id: Option<String>,
}

/// Wire response for a cancellation; also the idempotency snapshot, so
/// replays are byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub booking_id: i64,
    pub status: String,
    pub seats_released: usize,
    pub already_cancelled: bool,
}

pub struct BookingCoordinator {
    db: DbPool,
    availability: Arc<AvailabilityCache>,
    idempotency: Arc<IdempotencyStore>,
    tickets: Arc<TicketGenerator>,
    bus: Arc<dyn EventBus>,
    config: BookingConfig,
}

const REFERENCE_RETRIES: usize = 5;

impl BookingCoordinator {
    pub fn new(
        db: DbPool,
        availability: Arc<AvailabilityCache>,
        idempotency: Arc<IdempotencyStore>,
        tickets: Arc<TicketGenerator>,
        bus: Arc<dyn EventBus>,
        config: BookingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            availability,
            idempotency,
            tickets,
            bus,
            config,
        })
    }

    /// Create a `pending` booking from seats the user already holds locks
    /// on. The linked locks are extended to the payment window so a pending
    /// booking cannot lose its seats to the sweeper mid-payment.
    pub async fn create_booking(
        &self,
        origin: Origin,
        event_id: i64,
        user_id: i64,
        selections: Vec<SeatSelection>,
    ) -> Result<BookingView, ApiError> {
        validation::check_id("event_id", event_id)?;
        validation::check_seat_selection_len(selections.len())?;

        // Normalize labels and group per seat type; duplicates are a
        // client error, caught before any store work.
        let mut by_type: HashMap<i64, Vec<String>> = HashMap::new();
        let mut seen = HashSet::new();
        for sel in &selections {
            validation::check_id("seat_type_id", sel.seat_type_id)?;
            let label = validation::parse_seat_label(&sel.seat_label)?;
            if !seen.insert((sel.seat_type_id, label.as_str().to_string())) {
                return Err(ApiError::Validation(format!(
                    "Seat {} appears more than once",
                    label
                )));
            }
            by_type
                .entry(sel.seat_type_id)
                .or_default()
                .push(label.into_string());
        }
        let requested = selections.len();

        let deadline_ms = self.config.create_deadline.as_millis() as i64;
        let payment_window = Duration::seconds(self.config.payment_window_secs as i64);

        let view = db::transaction(&self.db, move |conn| {
            diesel::sql_query(format!("SET LOCAL statement_timeout = {}", deadline_ms))
                .execute(conn)?;

            let now = Utc::now().naive_utc();
            let booking_expires = now + payment_window;

            // Row-lock and verify every requested seat.
            let mut held: Vec<Seat> = Vec::with_capacity(requested);
            for (seat_type_id, labels) in &by_type {
                let rows = Seat::lock_by_labels(conn, *seat_type_id, labels)?;
                if rows.len() != labels.len() {
                    return Err(stale_locks());
                }
                for row in rows {
                    if row.event_id != event_id
                        || row.owner_user_id != user_id
                        || !row.is_locked_and_fresh(now)
                    {
                        return Err(stale_locks());
                    }
                    held.push(row);
                }
            }

            // None of these seats may already belong to a live booking.
            let seat_ids: Vec<i64> = held.iter().map(|s| s.id).collect();
            let already_linked =
                BookingSeat::seat_ids_held_by_active_bookings(conn, &seat_ids)?;
            if !already_linked.is_empty() {
                return Err(ApiError::Conflict(
                    "One or more seats already belong to an active booking".to_string(),
                ));
            }

            // Price each seat at its tier's current price.
            let type_ids: Vec<i64> = by_type.keys().copied().collect();
            let mut prices: HashMap<i64, Decimal> = HashMap::new();
            for type_id in &type_ids {
                let seat_type = SeatType::find(conn, *type_id)?
                    .filter(|st| st.event_id == event_id)
                    .ok_or_else(|| {
                        ApiError::NotFound(format!("Seat type {} not found", type_id))
                    })?;
                prices.insert(*type_id, seat_type.price);
            }
            let total: Decimal = held
                .iter()
                .map(|s| prices.get(&s.seat_type_id).copied().unwrap_or_default())
                .sum();

            // Reference collisions are vanishingly rare; retry a few times
            // and give up rather than loop forever.
            let mut booking = None;
            for _ in 0..REFERENCE_RETRIES {
                let candidate = NewBooking {
                    reference: generate_reference(now),
                    event_id,
                    user_id,
                    total_amount: total,
                    status: booking::STATUS_PENDING.to_string(),
                    payment_status: booking::PAYMENT_PENDING.to_string(),
                    booked_at: now,
                    expires_at: booking_expires,
                };
                match Booking::insert(conn, candidate) {
                    Ok(row) => {
                        booking = Some(row);
                        break;
                    }
                    Err(diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let booking = booking.ok_or_else(|| {
                ApiError::Internal("could not allocate a unique booking reference".to_string())
            })?;

            let links: Vec<NewBookingSeat> = held
                .iter()
                .map(|s| NewBookingSeat {
                    booking_id: booking.id,
                    seat_id: s.id,
                    price_paid: prices.get(&s.seat_type_id).copied().unwrap_or_default(),
                })
                .collect();
            let linked = BookingSeat::insert_many(conn, &links)?;
            if linked != requested {
                return Err(ApiError::Internal(format!(
                    "linked {} of {} requested seats",
                    linked, requested
                )));
            }

            // Keep the locks alive for the whole payment window.
            diesel::update(seats::table.filter(seats::id.eq_any(&seat_ids)))
                .set(seats::expires_at.eq(booking_expires))
                .execute(conn)?;

            let seat_views = held
                .iter()
                .map(|s| BookedSeatView {
                    seat_id: s.id,
                    seat_type_id: s.seat_type_id,
                    seat_label: s.seat_label.clone(),
                    status: s.status.clone(),
                    price_paid: prices.get(&s.seat_type_id).copied().unwrap_or_default(),
                })
                .collect();

            Ok(BookingView {
                booking,
                seats: seat_views,
            })
        })
        .await?;

        self.bus.publish(
            origin,
            BusEvent::BookingCreated {
                booking_id: view.booking.id,
                event_id,
                user_id,
                seat_count: view.seats.len(),
            },
        );

        tracing::info!(
            booking_id = view.booking.id,
            reference = %view.booking.reference,
            event_id,
            user_id,
            seats = view.seats.len(),
            "booking created"
        );

        Ok(view)
    }

    /// Confirm a booking on verified payment. Idempotent: redelivering the
    /// same payment yields the original confirmation.
    ///
    /// The webhook is the only caller; there is no client-facing confirm.
    pub async fn confirm_booking(
        &self,
        booking_id: i64,
        payment_id: &str,
        gateway: &str,
    ) -> Result<Confirmation, ApiError> {
        let payment_id = payment_id.to_string();
        let gateway = gateway.to_string();
        let deadline_ms = self.config.confirm_deadline.as_millis() as i64;

        let (booking, seats, newly_confirmed) = db::transaction(&self.db, move |conn| {
            diesel::sql_query(format!("SET LOCAL statement_timeout = {}", deadline_ms))
                .execute(conn)?;

            let now = Utc::now().naive_utc();
            let current = Booking::find_for_update(conn, booking_id)?
                .ok_or_else(|| ApiError::NotFound(format!("Booking {} not found", booking_id)))?;

            if current.is_confirmed_and_paid() {
                if current.payment_id.as_deref() == Some(payment_id.as_str()) {
                    let seats = BookingSeat::seats_for_booking(conn, booking_id)?;
                    return Ok((current, seats, false));
                }
                return Err(ApiError::Conflict(
                    "Booking is already confirmed with a different payment".to_string(),
                ));
            }

            if current.status != booking::STATUS_PENDING {
                return Err(ApiError::Conflict(format!(
                    "Booking is {} and cannot be confirmed",
                    current.status
                )));
            }
            if current.expires_at <= now {
                return Err(ApiError::Stale(
                    "Booking has expired. Please create a new booking.".to_string(),
                ));
            }

            let seat_ids = BookingSeat::seat_ids_for_booking(conn, booking_id)?;
            let rows = Seat::lock_by_ids(conn, &seat_ids)?;
            if rows.len() != seat_ids.len()
                || rows.iter().any(|s| s.status != seat::STATUS_LOCKED)
            {
                return Err(ApiError::Stale(
                    "Booking seats are no longer locked".to_string(),
                ));
            }

            let confirmed =
                Booking::mark_confirmed(conn, booking_id, &payment_id, &gateway, now)?
                    .ok_or_else(|| {
                        ApiError::Conflict("Booking was confirmed concurrently".to_string())
                    })?;

            for seat_id in &seat_ids {
                if Seat::mark_booked(conn, *seat_id, now)? != 1 {
                    return Err(ApiError::Internal(format!(
                        "seat {} did not transition to booked",
                        seat_id
                    )));
                }
            }

            let seats = BookingSeat::seats_for_booking(conn, booking_id)?;
            Ok((confirmed, seats, true))
        })
        .await?;

        if !newly_confirmed {
            return Ok(Confirmation {
                booking,
                already_confirmed: true,
                tickets: None,
                ticket_job_id: None,
            });
        }

        // Confirmation moves seats locked → booked; availability itself is
        // unchanged, only the event-details projection is stale.
        self.availability
            .invalidate_event_details(booking.event_id)
            .await;

        self.bus.publish(
            None,
            BusEvent::BookingConfirmed {
                booking_id: booking.id,
                event_id: booking.event_id,
            },
        );

        // Ticket generation runs off the confirmation path; if the queue is
        // gone, fall back to inline generation so the payer still gets
        // tickets in the response.
        let seeds: Vec<TicketSeed> = seats
            .iter()
            .map(|(s, price)| TicketSeed {
                seat_id: s.id,
                seat_label: s.seat_label.clone(),
                seat_type_id: s.seat_type_id,
                price_paid: *price,
            })
            .collect();

        let (tickets, ticket_job_id) = match self
            .tickets
            .enqueue_generation(booking.id, booking.reference.clone(), seeds.clone())
            .await
        {
            Ok(job_id) => (None, Some(job_id)),
            Err(e) => {
                tracing::warn!(error = %e, booking_id = booking.id, "ticket queue unavailable, generating inline");
                let inline = self
                    .tickets
                    .generate_inline(booking.id, &booking.reference, &seeds)
                    .await?;
                (Some(inline), None)
            }
        };

        tracing::info!(
            booking_id = booking.id,
            reference = %booking.reference,
            "booking confirmed"
        );

        Ok(Confirmation {
            booking,
            already_confirmed: false,
            tickets,
            ticket_job_id,
        })
    }

    /// Cancel a pending booking, releasing its still-locked seats and
    /// restoring availability. Idempotent under a client-supplied key, and
    /// terminally idempotent without one.
    pub async fn cancel_booking(
        &self,
        origin: Origin,
        booking_id: i64,
        user_id: i64,
        reason: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<CancelResponse, ApiError> {
        if let Some(key) = &idempotency_key {
            match self
                .idempotency
                .begin(key, "cancel_booking", Some(booking_id.to_string()), user_id)
                .await?
            {
                Claim::Started => {}
                Claim::Replay(snapshot) => {
                    let replay: CancelResponse =
                        serde_json::from_str(&snapshot).map_err(|e| {
                            ApiError::Internal(format!("corrupt idempotency snapshot: {}", e))
                        })?;
                    return Ok(replay);
                }
            }
        }

        let result = self.cancel_inner(origin, booking_id, user_id, reason).await;

        if let Some(key) = &idempotency_key {
            match &result {
                Ok(response) => {
                    let snapshot = serde_json::to_string(response).map_err(|e| {
                        ApiError::Internal(format!("snapshot serialization: {}", e))
                    })?;
                    self.idempotency.complete(key, snapshot).await?;
                }
                Err(_) => self.idempotency.fail(key).await,
            }
        }

        result
    }

    async fn cancel_inner(
        &self,
        origin: Origin,
        booking_id: i64,
        user_id: i64,
        reason: Option<String>,
    ) -> Result<CancelResponse, ApiError> {
        let (response, event_id, restored) = db::transaction(&self.db, move |conn| {
            let now = Utc::now().naive_utc();

            // SKIP LOCKED so a second cancel does not deadlock behind the
            // first; it reports IN_FLIGHT instead.
            let locked = Booking::find_for_update_skip_locked(conn, booking_id)?;
            let current = match locked {
                Some(row) => row,
                None => {
                    return match Booking::find(conn, booking_id)? {
                        Some(_) => Err(ApiError::InFlight),
                        None => Err(ApiError::NotFound(format!(
                            "Booking {} not found",
                            booking_id
                        ))),
                    };
                }
            };

            if current.user_id != user_id {
                return Err(ApiError::NotFound(format!(
                    "Booking {} not found",
                    booking_id
                )));
            }

            if current.is_confirmed_and_paid() {
                return Err(ApiError::Conflict(
                    "A paid booking cannot be cancelled; request a refund instead".to_string(),
                ));
            }

            if current.status == booking::STATUS_CANCELLED {
                return Ok((
                    CancelResponse {
                        booking_id,
                        status: booking::STATUS_CANCELLED.to_string(),
                        seats_released: 0,
                        already_cancelled: true,
                    },
                    current.event_id,
                    HashMap::new(),
                ));
            }

            let seat_ids = BookingSeat::seat_ids_for_booking(conn, booking_id)?;
            let released_types = Seat::delete_locked_by_ids(conn, &seat_ids)?;

            let mut restored: HashMap<i64, i32> = HashMap::new();
            for seat_type_id in &released_types {
                *restored.entry(*seat_type_id).or_insert(0) += 1;
            }
            for (seat_type_id, count) in &restored {
                SeatType::restore(conn, *seat_type_id, *count)?;
            }

            Booking::mark_cancelled(
                conn,
                booking_id,
                reason.as_deref(),
                booking::PAYMENT_REFUNDED,
                now,
            )?;

            Ok((
                CancelResponse {
                    booking_id,
                    status: booking::STATUS_CANCELLED.to_string(),
                    seats_released: released_types.len(),
                    already_cancelled: false,
                },
                current.event_id,
                restored,
            ))
        })
        .await?;

        if !response.already_cancelled {
            for (seat_type_id, count) in &restored {
                self.availability
                    .increment(event_id, *seat_type_id, *count as i64)
                    .await;
            }
            self.availability.invalidate_event_details(event_id).await;
            self.bus.publish(
                origin,
                BusEvent::BookingCancelled {
                    booking_id,
                    event_id,
                },
            );
            tracing::info!(booking_id, user_id, "booking cancelled");
        }

        Ok(response)
    }

    /// Mark a pending booking's payment failed (webhook `payment.failed`).
    pub async fn mark_payment_failed(&self, booking_id: i64) -> Result<(), ApiError> {
        db::run(&self.db, move |conn| {
            Booking::mark_payment_failed(conn, booking_id)?;
            Ok(())
        })
        .await
    }

    /// Owner- or organizer-visible booking read.
    pub async fn get_booking(
        &self,
        booking_id: i64,
        requester_user_id: i64,
    ) -> Result<BookingView, ApiError> {
        db::run(&self.db, move |conn| {
            let booking = Booking::find(conn, booking_id)?
                .ok_or_else(|| ApiError::NotFound(format!("Booking {} not found", booking_id)))?;

            if booking.user_id != requester_user_id {
                let organizer: Option<i64> = crate::schema::events::table
                    .filter(crate::schema::events::id.eq(booking.event_id))
                    .select(crate::schema::events::organizer_id)
                    .first(conn)
                    .optional()?;
                if organizer != Some(requester_user_id) {
                    return Err(ApiError::NotFound(format!(
                        "Booking {} not found",
                        booking_id
                    )));
                }
            }

            let seats = BookingSeat::seats_for_booking(conn, booking_id)?
                .into_iter()
                .map(|(s, price)| BookedSeatView {
                    seat_id: s.id,
                    seat_type_id: s.seat_type_id,
                    seat_label: s.seat_label,
                    status: s.status,
                    price_paid: price,
                })
                .collect();

            Ok(BookingView { booking, seats })
        })
        .await
    }

    pub async fn list_user_bookings(
        &self,
        user_id: i64,
        status: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Booking>, ApiError> {
        if let Some(status) = &status {
            let known = [
                booking::STATUS_PENDING,
                booking::STATUS_CONFIRMED,
                booking::STATUS_CANCELLED,
            ];
            if !known.contains(&status.as_str()) {
                return Err(ApiError::Validation(format!(
                    "Unknown booking status filter: {}",
                    status
                )));
            }
        }
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        db::run(&self.db, move |conn| {
            Booking::list_for_user(conn, user_id, status, limit, offset).map_err(ApiError::from)
        })
        .await
    }
}

fn stale_locks() -> ApiError {
    ApiError::Stale(
        "One or more seat locks have expired or are not held by you. Please re-select your seats."
            .to_string(),
    )
}
