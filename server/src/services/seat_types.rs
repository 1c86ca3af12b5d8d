//! Seat-type management (organizer-only)
//!
//! Create, update, and delete priced tiers. A quantity change re-derives
//! availability without ever dropping below live reservations; deletion is
//! refused while any seat row for the tier exists.

use diesel::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::bus::{BusEvent, EventBus, Origin};
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::{Event, NewSeatType, SeatType};
use crate::schema::seats;
use crate::services::availability::AvailabilityCache;
use crate::validation;

pub struct SeatTypeService {
    db: DbPool,
    availability: Arc<AvailabilityCache>,
    bus: Arc<dyn EventBus>,
}

impl SeatTypeService {
    pub fn new(db: DbPool, availability: Arc<AvailabilityCache>, bus: Arc<dyn EventBus>) -> Arc<Self> {
        Arc::new(Self {
            db,
            availability,
            bus,
        })
    }

    async fn ensure_organizer(&self, event_id: i64, user_id: i64) -> Result<Event, ApiError> {
        let event = db::run(&self.db, move |conn| {
            Event::find(conn, event_id).map_err(ApiError::from)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", event_id)))?;

        if event.organizer_id != user_id {
            return Err(ApiError::NotFound(format!("Event {} not found", event_id)));
        }
        Ok(event)
    }

    pub async fn create(
        &self,
        origin: Origin,
        event_id: i64,
        user_id: i64,
        name: String,
        price: Decimal,
        quantity: i32,
    ) -> Result<SeatType, ApiError> {
        validation::check_id("event_id", event_id)?;
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Seat type name is required".to_string()));
        }
        if price < Decimal::ZERO {
            return Err(ApiError::Validation("Price must not be negative".to_string()));
        }
        if quantity < 0 {
            return Err(ApiError::Validation("Quantity must not be negative".to_string()));
        }
        self.ensure_organizer(event_id, user_id).await?;

        let name_clone = name.trim().to_string();
        let created = db::run(&self.db, move |conn| {
            SeatType::create(
                conn,
                NewSeatType {
                    event_id,
                    name: name_clone,
                    price,
                    quantity,
                    available_quantity: quantity,
                },
            )
            .map_err(ApiError::from)
        })
        .await?;

        self.bus.publish(
            origin,
            BusEvent::SeatTypeCreated {
                event_id,
                seat_type_id: created.id,
                name: created.name.clone(),
                available_quantity: created.available_quantity,
            },
        );

        Ok(created)
    }

    pub async fn update(
        &self,
        origin: Origin,
        event_id: i64,
        seat_type_id: i64,
        user_id: i64,
        name: Option<String>,
        price: Option<Decimal>,
        quantity: Option<i32>,
    ) -> Result<SeatType, ApiError> {
        if let Some(price) = price {
            if price < Decimal::ZERO {
                return Err(ApiError::Validation("Price must not be negative".to_string()));
            }
        }
        if let Some(quantity) = quantity {
            if quantity < 0 {
                return Err(ApiError::Validation("Quantity must not be negative".to_string()));
            }
        }
        self.ensure_organizer(event_id, user_id).await?;

        let updated = db::run(&self.db, move |conn| {
            let current = SeatType::find(conn, seat_type_id)?
                .filter(|st| st.event_id == event_id)
                .ok_or_else(|| ApiError::NotFound(format!("Seat type {} not found", seat_type_id)))?;
            let _ = current;
            SeatType::apply_update(conn, seat_type_id, name, price, quantity)?
                .ok_or_else(|| ApiError::NotFound(format!("Seat type {} not found", seat_type_id)))
        })
        .await?;

        self.availability.invalidate(event_id, seat_type_id).await;
        self.bus.publish(
            origin,
            BusEvent::SeatTypeUpdated {
                event_id,
                seat_type_id,
                available_quantity: updated.available_quantity,
            },
        );

        Ok(updated)
    }

    pub async fn delete(
        &self,
        origin: Origin,
        event_id: i64,
        seat_type_id: i64,
        user_id: i64,
    ) -> Result<(), ApiError> {
        self.ensure_organizer(event_id, user_id).await?;

        db::transaction(&self.db, move |conn| {
            let exists = SeatType::find(conn, seat_type_id)?
                .filter(|st| st.event_id == event_id)
                .is_some();
            if !exists {
                return Err(ApiError::NotFound(format!(
                    "Seat type {} not found",
                    seat_type_id
                )));
            }

            let live: i64 = seats::table
                .filter(seats::seat_type_id.eq(seat_type_id))
                .count()
                .get_result(conn)?;
            if live > 0 {
                return Err(ApiError::Conflict(
                    "Seat type has live reservations and cannot be deleted".to_string(),
                ));
            }

            SeatType::delete(conn, seat_type_id)?;
            Ok(())
        })
        .await?;

        self.availability.invalidate(event_id, seat_type_id).await;
        self.bus.publish(
            origin,
            BusEvent::SeatTypeDeleted {
                event_id,
                seat_type_id,
            },
        );

        Ok(())
    }

    pub async fn list(&self, event_id: i64) -> Result<Vec<SeatType>, ApiError> {
        db::run(&self.db, move |conn| {
            SeatType::list_for_event(conn, event_id).map_err(ApiError::from)
        })
        .await
    }
}
