//! Seat type model
//!
//! A priced tier within an event with a bounded quantity. The
//! `available_quantity` column is the authoritative availability value; the
//! Redis counter is only a projection of it.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::event_seat_types;

diesel::sql_function! {
    fn least(a: Integer, b: Integer) -> Integer;
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = event_seat_types)]
pub struct SeatType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub available_quantity: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = event_seat_types)]
pub struct NewSeatType {
    pub event_id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub available_quantity: i32,
}

impl SeatType {
    pub fn create(conn: &mut PgConnection, new: NewSeatType) -> QueryResult<SeatType> {
        diesel::insert_into(event_seat_types::table)
            .values(&new)
            .get_result(conn)
    }

    pub fn find(conn: &mut PgConnection, seat_type_id: i64) -> QueryResult<Option<SeatType>> {
        event_seat_types::table
            .filter(event_seat_types::id.eq(seat_type_id))
            .first(conn)
            .optional()
    }

    pub fn list_for_event(conn: &mut PgConnection, event_id: i64) -> QueryResult<Vec<SeatType>> {
        event_seat_types::table
            .filter(event_seat_types::event_id.eq(event_id))
            .order(event_seat_types::id.asc())
            .load(conn)
    }

    /// Take one unit of availability. Returns the remaining quantity, or
    /// None when the tier is sold out (the guard refused the decrement).
    pub fn take_one(conn: &mut PgConnection, seat_type_id: i64) -> QueryResult<Option<i32>> {
        diesel::update(
            event_seat_types::table
                .filter(event_seat_types::id.eq(seat_type_id))
                .filter(event_seat_types::available_quantity.gt(0)),
        )
        .set((
            event_seat_types::available_quantity.eq(event_seat_types::available_quantity - 1),
            event_seat_types::updated_at.eq(diesel::dsl::now),
        ))
        .returning(event_seat_types::available_quantity)
        .get_result(conn)
        .optional()
    }

    /// Return `count` units of availability, capped at the tier's quantity.
    pub fn restore(
        conn: &mut PgConnection,
        seat_type_id: i64,
        count: i32,
    ) -> QueryResult<Option<i32>> {
        diesel::update(event_seat_types::table.filter(event_seat_types::id.eq(seat_type_id)))
            .set((
                event_seat_types::available_quantity.eq(least(
                    event_seat_types::quantity,
                    event_seat_types::available_quantity + count,
                )),
                event_seat_types::updated_at.eq(diesel::dsl::now),
            ))
            .returning(event_seat_types::available_quantity)
            .get_result(conn)
            .optional()
    }

    /// Organizer edit. A quantity change re-derives availability as
    /// `new_quantity − live reservations`, floored at zero.
    pub fn apply_update(
        conn: &mut PgConnection,
        seat_type_id: i64,
        name: Option<String>,
        price: Option<Decimal>,
        quantity: Option<i32>,
    ) -> QueryResult<Option<SeatType>> {
        conn.transaction(|conn| {
            let current: Option<SeatType> = event_seat_types::table
                .filter(event_seat_types::id.eq(seat_type_id))
                .for_update()
                .first(conn)
                .optional()?;

            let Some(current) = current else {
                return Ok(None);
            };

            let new_name = name.unwrap_or(current.name);
            let new_price = price.unwrap_or(current.price);
            let new_quantity = quantity.unwrap_or(current.quantity);
            let reserved = current.quantity - current.available_quantity;
            let new_available = (new_quantity - reserved).max(0);

            diesel::update(event_seat_types::table.filter(event_seat_types::id.eq(seat_type_id)))
                .set((
                    event_seat_types::name.eq(new_name),
                    event_seat_types::price.eq(new_price),
                    event_seat_types::quantity.eq(new_quantity),
                    event_seat_types::available_quantity.eq(new_available),
                    event_seat_types::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(conn)
                .optional()
        })
    }

    pub fn delete(conn: &mut PgConnection, seat_type_id: i64) -> QueryResult<usize> {
        diesel::delete(event_seat_types::table.filter(event_seat_types::id.eq(seat_type_id)))
            .execute(conn)
    }
}
