//! Booking model
//!
//! State machine: `pending → confirmed` on verified payment,
//! `pending → cancelled` on user request or timeout. `confirmed` is
//! terminal for every public operation.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::bookings;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_CANCELLED: &str = "cancelled";

pub const PAYMENT_PENDING: &str = "pending";
pub const PAYMENT_COMPLETED: &str = "completed";
pub const PAYMENT_FAILED: &str = "failed";
pub const PAYMENT_REFUNDED: &str = "refunded";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = bookings)]
pub struct Booking {
    pub id: i64,
    pub reference: String,
    pub event_id: i64,
    pub user_id: i64,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_status: String,
    pub payment_id: Option<String>,
    pub payment_gateway: Option<String>,
    pub booked_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = bookings)]
pub struct NewBooking {
    pub reference: String,
    pub event_id: i64,
    pub user_id: i64,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_status: String,
    pub booked_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl Booking {
    pub fn insert(conn: &mut PgConnection, new: NewBooking) -> QueryResult<Booking> {
        diesel::insert_into(bookings::table)
            .values(&new)
            .get_result(conn)
    }

    pub fn find(conn: &mut PgConnection, booking_id: i64) -> QueryResult<Option<Booking>> {
        bookings::table
            .filter(bookings::id.eq(booking_id))
            .first(conn)
            .optional()
    }

    pub fn find_for_update(conn: &mut PgConnection, booking_id: i64) -> QueryResult<Option<Booking>> {
        bookings::table
            .filter(bookings::id.eq(booking_id))
            .for_update()
            .first(conn)
            .optional()
    }

    /// Row-lock without waiting. None either means the booking does not
    /// exist or another transaction holds it; callers disambiguate with a
    /// plain read.
    pub fn find_for_update_skip_locked(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> QueryResult<Option<Booking>> {
        bookings::table
            .filter(bookings::id.eq(booking_id))
            .for_update()
            .skip_locked()
            .first(conn)
            .optional()
    }

    /// Look up by the provider order id stored during order creation.
    pub fn find_by_payment_id(
        conn: &mut PgConnection,
        payment_id: &str,
    ) -> QueryResult<Option<Booking>> {
        bookings::table
            .filter(bookings::payment_id.eq(payment_id))
            .first(conn)
            .optional()
    }

    pub fn list_for_user(
        conn: &mut PgConnection,
        user_id: i64,
        status: Option<String>,
        limit: i64,
        offset: i64,
    ) -> QueryResult<Vec<Booking>> {
        let mut query = bookings::table
            .filter(bookings::user_id.eq(user_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(bookings::status.eq(status));
        }
        query
            .order(bookings::booked_at.desc())
            .limit(limit)
            .offset(offset)
            .load(conn)
    }

    /// Store the provider order id on the booking pre-payment. The guard on
    /// status keeps a paid booking's payment id immutable.
    pub fn set_payment_order(
        conn: &mut PgConnection,
        booking_id: i64,
        order_id: &str,
        gateway: &str,
    ) -> QueryResult<usize> {
        diesel::update(
            bookings::table
                .filter(bookings::id.eq(booking_id))
                .filter(bookings::status.eq(STATUS_PENDING)),
        )
        .set((
            bookings::payment_id.eq(order_id),
            bookings::payment_gateway.eq(gateway),
        ))
        .execute(conn)
    }

    /// Optimistically-guarded confirmation. Affects zero rows when another
    /// request already confirmed (or the booking left `pending`).
    pub fn mark_confirmed(
        conn: &mut PgConnection,
        booking_id: i64,
        payment_id: &str,
        gateway: &str,
        now: NaiveDateTime,
    ) -> QueryResult<Option<Booking>> {
        diesel::update(
            bookings::table
                .filter(bookings::id.eq(booking_id))
                .filter(bookings::status.eq(STATUS_PENDING))
                .filter(bookings::payment_status.eq(PAYMENT_PENDING)),
        )
        .set((
            bookings::status.eq(STATUS_CONFIRMED),
            bookings::payment_status.eq(PAYMENT_COMPLETED),
            bookings::payment_id.eq(payment_id),
            bookings::payment_gateway.eq(gateway),
            bookings::confirmed_at.eq(now),
        ))
        .get_result(conn)
        .optional()
    }

    pub fn mark_cancelled(
        conn: &mut PgConnection,
        booking_id: i64,
        reason: Option<&str>,
        payment_status: &str,
        now: NaiveDateTime,
    ) -> QueryResult<Option<Booking>> {
        diesel::update(
            bookings::table
                .filter(bookings::id.eq(booking_id))
                .filter(bookings::status.eq(STATUS_PENDING)),
        )
        .set((
            bookings::status.eq(STATUS_CANCELLED),
            bookings::payment_status.eq(payment_status),
            bookings::cancelled_at.eq(now),
            bookings::cancellation_reason.eq(reason),
        ))
        .get_result(conn)
        .optional()
    }

    pub fn mark_payment_failed(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> QueryResult<usize> {
        diesel::update(
            bookings::table
                .filter(bookings::id.eq(booking_id))
                .filter(bookings::status.eq(STATUS_PENDING)),
        )
        .set(bookings::payment_status.eq(PAYMENT_FAILED))
        .execute(conn)
    }

    /// Sweep: pending bookings past their payment window become cancelled.
    /// Their seat rows are reclaimed by the expired-lock sweep.
    pub fn cancel_expired_pending(
        conn: &mut PgConnection,
        now: NaiveDateTime,
    ) -> QueryResult<Vec<Booking>> {
        diesel::update(
            bookings::table
                .filter(bookings::status.eq(STATUS_PENDING))
                .filter(bookings::expires_at.le(now)),
        )
        .set((
            bookings::status.eq(STATUS_CANCELLED),
            bookings::cancelled_at.eq(now),
            bookings::cancellation_reason.eq("payment window expired"),
        ))
        .get_results(conn)
    }

    pub fn is_confirmed_and_paid(&self) -> bool {
        self.status == STATUS_CONFIRMED && self.payment_status == PAYMENT_COMPLETED
    }
}

/// Generate a booking reference: `BKG-YYYY-MMDD-HHMMSS-XXXX` with a 4-hex
/// random suffix. Collisions are resolved by the caller's bounded retry.
pub fn generate_reference(now: NaiveDateTime) -> String {
    let suffix: u16 = rand::random();
    format!(
        "BKG-{}-{:04X}",
        now.format("%Y-%m%d-%H%M%S"),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn reference_format() {
        let at = NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(9, 30, 5)
            .unwrap();
        let reference = generate_reference(at);
        assert!(reference.starts_with("BKG-2025-0614-093005-"));
        let suffix = reference.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn confirmed_and_paid_needs_both() {
        let now = chrono::Utc::now().naive_utc();
        let mut booking = Booking {
            id: 1,
            reference: "BKG-2025-0614-093005-00FF".to_string(),
            event_id: 1,
            user_id: 1,
            total_amount: Decimal::ZERO,
            status: STATUS_CONFIRMED.to_string(),
            payment_status: PAYMENT_PENDING.to_string(),
            payment_id: None,
            payment_gateway: None,
            booked_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            expires_at: now,
        };
        assert!(!booking.is_confirmed_and_paid());
        booking.payment_status = PAYMENT_COMPLETED.to_string();
        assert!(booking.is_confirmed_and_paid());
    }
}
