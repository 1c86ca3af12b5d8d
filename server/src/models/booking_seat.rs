//! Booking ↔ seat link rows

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::booking;
use crate::models::seat::Seat;
use crate::schema::{booking_seats, bookings, seats};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = booking_seats)]
pub struct BookingSeat {
    pub id: i64,
    pub booking_id: i64,
    pub seat_id: i64,
    pub price_paid: Decimal,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = booking_seats)]
pub struct NewBookingSeat {
    pub booking_id: i64,
    pub seat_id: i64,
    pub price_paid: Decimal,
}

impl BookingSeat {
    /// Link seats to a booking. Returns the number of rows written so the
    /// caller can verify it matches the request cardinality.
    pub fn insert_many(conn: &mut PgConnection, links: &[NewBookingSeat]) -> QueryResult<usize> {
        diesel::insert_into(booking_seats::table)
            .values(links)
            .on_conflict((booking_seats::booking_id, booking_seats::seat_id))
            .do_nothing()
            .execute(conn)
    }

    /// Which of `seat_ids` are already linked to a non-cancelled booking.
    pub fn seat_ids_held_by_active_bookings(
        conn: &mut PgConnection,
        seat_ids: &[i64],
    ) -> QueryResult<Vec<i64>> {
        booking_seats::table
            .inner_join(bookings::table)
            .filter(booking_seats::seat_id.eq_any(seat_ids))
            .filter(bookings::status.ne(booking::STATUS_CANCELLED))
            .select(booking_seats::seat_id)
            .load(conn)
    }

    /// Seats linked to a booking, with the price captured at booking time.
    pub fn seats_for_booking(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> QueryResult<Vec<(Seat, Decimal)>> {
        booking_seats::table
            .inner_join(seats::table)
            .filter(booking_seats::booking_id.eq(booking_id))
            .select((seats::all_columns, booking_seats::price_paid))
            .order(seats::seat_label.asc())
            .load(conn)
    }

    pub fn seat_ids_for_booking(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> QueryResult<Vec<i64>> {
        booking_seats::table
            .filter(booking_seats::booking_id.eq(booking_id))
            .select(booking_seats::seat_id)
            .load(conn)
    }
}
