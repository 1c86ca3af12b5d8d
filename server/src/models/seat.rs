//! Seat model
//!
//! A seat row exists only while it is reserved: it is created `locked` by a
//! successful acquire, deleted on release or expiry, and transitions to
//! `booked` on confirmation. Availability is arithmetic over these rows,
//! never an enumeration.
//!
//! The `(seat_type_id, seat_label)` unique constraint is the final arbiter
//! between concurrent acquires.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::seats;

pub const STATUS_LOCKED: &str = "locked";
pub const STATUS_BOOKED: &str = "booked";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = seats)]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    pub seat_type_id: i64,
    pub seat_label: String,
    pub status: String,
    pub owner_user_id: i64,
    pub locked_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub booked_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = seats)]
pub struct NewSeat {
    pub event_id: i64,
    pub seat_type_id: i64,
    pub seat_label: String,
    pub status: String,
    pub owner_user_id: i64,
    pub locked_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl Seat {
    /// Claim the persisted slot for a label. `ON CONFLICT DO NOTHING`
    /// returns None when another transaction holds the row; the caller
    /// compensates its KV entry and reports a conflict.
    pub fn try_insert_locked(conn: &mut PgConnection, new: NewSeat) -> QueryResult<Option<Seat>> {
        diesel::insert_into(seats::table)
            .values(&new)
            .on_conflict((seats::seat_type_id, seats::seat_label))
            .do_nothing()
            .get_result(conn)
            .optional()
    }

    pub fn find_by_label(
        conn: &mut PgConnection,
        seat_type_id: i64,
        seat_label: &str,
    ) -> QueryResult<Option<Seat>> {
        seats::table
            .filter(seats::seat_type_id.eq(seat_type_id))
            .filter(seats::seat_label.eq(seat_label))
            .first(conn)
            .optional()
    }

    /// Row-lock the seats for a label set. Order by label so concurrent
    /// bookings over overlapping sets lock in a consistent order.
    pub fn lock_by_labels(
        conn: &mut PgConnection,
        seat_type_id: i64,
        labels: &[String],
    ) -> QueryResult<Vec<Seat>> {
        seats::table
            .filter(seats::seat_type_id.eq(seat_type_id))
            .filter(seats::seat_label.eq_any(labels))
            .order(seats::seat_label.asc())
            .for_update()
            .load(conn)
    }

    /// Row-lock seats by id (confirmation path).
    pub fn lock_by_ids(conn: &mut PgConnection, ids: &[i64]) -> QueryResult<Vec<Seat>> {
        seats::table
            .filter(seats::id.eq_any(ids))
            .order(seats::id.asc())
            .for_update()
            .load(conn)
    }

    /// Delete a lock held by `user_id`. Returns the deleted row, if the
    /// caller was in fact the holder of a live lock.
    pub fn delete_lock_of_holder(
        conn: &mut PgConnection,
        seat_type_id: i64,
        seat_label: &str,
        user_id: i64,
    ) -> QueryResult<Option<Seat>> {
        diesel::delete(
            seats::table
                .filter(seats::seat_type_id.eq(seat_type_id))
                .filter(seats::seat_label.eq(seat_label))
                .filter(seats::status.eq(STATUS_LOCKED))
                .filter(seats::owner_user_id.eq(user_id)),
        )
        .get_result(conn)
        .optional()
    }

    /// Move a holder's lock expiry to an absolute timestamp computed in
    /// application code.
    pub fn extend_lock_of_holder(
        conn: &mut PgConnection,
        seat_type_id: i64,
        seat_label: &str,
        user_id: i64,
        new_expires_at: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(
            seats::table
                .filter(seats::seat_type_id.eq(seat_type_id))
                .filter(seats::seat_label.eq(seat_label))
                .filter(seats::status.eq(STATUS_LOCKED))
                .filter(seats::owner_user_id.eq(user_id)),
        )
        .set(seats::expires_at.eq(new_expires_at))
        .execute(conn)
    }

    pub fn list_locked_by_user(
        conn: &mut PgConnection,
        event_id: i64,
        user_id: i64,
        now: NaiveDateTime,
    ) -> QueryResult<Vec<Seat>> {
        seats::table
            .filter(seats::event_id.eq(event_id))
            .filter(seats::owner_user_id.eq(user_id))
            .filter(seats::status.eq(STATUS_LOCKED))
            .filter(seats::expires_at.gt(now))
            .order(seats::seat_label.asc())
            .load(conn)
    }

    /// Transition one seat to booked. Affects zero rows when the seat is no
    /// longer locked, which aborts the confirmation.
    pub fn mark_booked(
        conn: &mut PgConnection,
        seat_id: i64,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        diesel::update(
            seats::table
                .filter(seats::id.eq(seat_id))
                .filter(seats::status.eq(STATUS_LOCKED)),
        )
        .set((
            seats::status.eq(STATUS_BOOKED),
            seats::booked_at.eq(now),
        ))
        .execute(conn)
    }

    /// Sweep expired locks. Returns (seat_type_id, event_id, seat_label)
    /// per deleted row so the caller can restore availability, invalidate
    /// caches, and drop any leftover KV lock keys.
    pub fn delete_expired_locks(
        conn: &mut PgConnection,
        now: NaiveDateTime,
    ) -> QueryResult<Vec<(i64, i64, String)>> {
        diesel::delete(
            seats::table
                .filter(seats::status.eq(STATUS_LOCKED))
                .filter(seats::expires_at.le(now)),
        )
        .returning((seats::seat_type_id, seats::event_id, seats::seat_label))
        .get_results(conn)
    }

    /// Delete specific seat rows while they are still locked (cancellation
    /// path). Returns seat_type_id per deleted row.
    pub fn delete_locked_by_ids(
        conn: &mut PgConnection,
        ids: &[i64],
    ) -> QueryResult<Vec<i64>> {
        diesel::delete(
            seats::table
                .filter(seats::id.eq_any(ids))
                .filter(seats::status.eq(STATUS_LOCKED)),
        )
        .returning(seats::seat_type_id)
        .get_results(conn)
    }

    pub fn is_locked_and_fresh(&self, now: NaiveDateTime) -> bool {
        self.status == STATUS_LOCKED && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn seat(status: &str, expires_offset: Duration) -> Seat {
        let now = Utc::now().naive_utc();
        Seat {
            id: 1,
            event_id: 1,
            seat_type_id: 1,
            seat_label: "V1".to_string(),
            status: status.to_string(),
            owner_user_id: 42,
            locked_at: now,
            expires_at: now + expires_offset,
            booked_at: None,
        }
    }

    #[test]
    fn freshness_requires_locked_and_unexpired() {
        let now = Utc::now().naive_utc();
        assert!(seat(STATUS_LOCKED, Duration::seconds(60)).is_locked_and_fresh(now));
        assert!(!seat(STATUS_LOCKED, Duration::seconds(-1)).is_locked_and_fresh(now));
        assert!(!seat(STATUS_BOOKED, Duration::seconds(60)).is_locked_and_fresh(now));
    }
}
