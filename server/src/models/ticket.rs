//! Ticket model
//!
//! Tickets are written by the async generator with an upsert keyed on
//! `ticket_id`, which makes redelivered generation jobs harmless.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::tickets;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_GENERATED: &str = "generated";
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i64,
    pub booking_id: i64,
    pub seat_id: i64,
    pub ticket_id: String,
    pub seat_label: String,
    pub seat_type_name: String,
    pub price_paid: Decimal,
    pub qr_payload: Option<String>,
    pub status: String,
    pub email_sent: bool,
    pub sms_sent: bool,
    pub generated_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub booking_id: i64,
    pub seat_id: i64,
    pub ticket_id: String,
    pub seat_label: String,
    pub seat_type_name: String,
    pub price_paid: Decimal,
    pub qr_payload: Option<String>,
    pub status: String,
    pub generated_at: Option<NaiveDateTime>,
}

/// Aggregate delivery state across a booking's tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Pending,
    Generating,
    Partial,
    Ready,
}

impl Ticket {
    /// Idempotent write: a re-run job overwrites the same ticket row rather
    /// than duplicating it.
    pub fn upsert(conn: &mut PgConnection, new: NewTicket) -> QueryResult<Ticket> {
        diesel::insert_into(tickets::table)
            .values(&new)
            .on_conflict(tickets::ticket_id)
            .do_update()
            .set((
                tickets::qr_payload.eq(new.qr_payload.clone()),
                tickets::status.eq(new.status.clone()),
                tickets::generated_at.eq(new.generated_at),
            ))
            .get_result(conn)
    }

    pub fn list_for_booking(conn: &mut PgConnection, booking_id: i64) -> QueryResult<Vec<Ticket>> {
        tickets::table
            .filter(tickets::booking_id.eq(booking_id))
            .order(tickets::seat_label.asc())
            .load(conn)
    }

    pub fn count_for_booking(conn: &mut PgConnection, booking_id: i64) -> QueryResult<i64> {
        tickets::table
            .filter(tickets::booking_id.eq(booking_id))
            .count()
            .get_result(conn)
    }

    pub fn mark_failed(conn: &mut PgConnection, booking_id: i64) -> QueryResult<usize> {
        diesel::update(
            tickets::table
                .filter(tickets::booking_id.eq(booking_id))
                .filter(tickets::status.eq(STATUS_PENDING)),
        )
        .set(tickets::status.eq(STATUS_FAILED))
        .execute(conn)
    }

    pub fn mark_email_sent(
        conn: &mut PgConnection,
        booking_id: i64,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        conn.transaction(|conn| {
            let updated = diesel::update(tickets::table.filter(tickets::booking_id.eq(booking_id)))
                .set(tickets::email_sent.eq(true))
                .execute(conn)?;
            diesel::update(
                tickets::table
                    .filter(tickets::booking_id.eq(booking_id))
                    .filter(tickets::delivered_at.is_null()),
            )
            .set(tickets::delivered_at.eq(now))
            .execute(conn)?;
            Ok(updated)
        })
    }

    pub fn mark_sms_sent(
        conn: &mut PgConnection,
        booking_id: i64,
        now: NaiveDateTime,
    ) -> QueryResult<usize> {
        conn.transaction(|conn| {
            let updated = diesel::update(tickets::table.filter(tickets::booking_id.eq(booking_id)))
                .set(tickets::sms_sent.eq(true))
                .execute(conn)?;
            diesel::update(
                tickets::table
                    .filter(tickets::booking_id.eq(booking_id))
                    .filter(tickets::delivered_at.is_null()),
            )
            .set(tickets::delivered_at.eq(now))
            .execute(conn)?;
            Ok(updated)
        })
    }
}

/// `TKT-{booking_ref}-{seat_label}`, carried in the QR payload.
pub fn ticket_id_for(booking_reference: &str, seat_label: &str) -> String {
    format!("TKT-{}-{}", booking_reference, seat_label)
}

/// Derive the aggregate status from individual ticket rows. `expected` is
/// the booking's seat count; fewer rows than that means generation has not
/// finished writing.
pub fn aggregate_status(tickets: &[Ticket], expected: usize) -> AggregateStatus {
    if tickets.is_empty() {
        return AggregateStatus::Pending;
    }
    if tickets.iter().any(|t| t.status == STATUS_FAILED) {
        return AggregateStatus::Partial;
    }
    let generated = tickets
        .iter()
        .filter(|t| t.status == STATUS_GENERATED || t.status == STATUS_DELIVERED)
        .count();
    if generated == expected && tickets.len() == expected {
        AggregateStatus::Ready
    } else {
        AggregateStatus::Generating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(status: &str) -> Ticket {
        let now = chrono::Utc::now().naive_utc();
        Ticket {
            id: 1,
            booking_id: 1,
            seat_id: 1,
            ticket_id: "TKT-BKG-2025-0614-093005-00FF-V1".to_string(),
            seat_label: "V1".to_string(),
            seat_type_name: "VIP".to_string(),
            price_paid: Decimal::ZERO,
            qr_payload: None,
            status: status.to_string(),
            email_sent: false,
            sms_sent: false,
            generated_at: None,
            delivered_at: None,
            created_at: now,
        }
    }

    #[test]
    fn ticket_id_format() {
        assert_eq!(
            ticket_id_for("BKG-2025-0614-093005-00FF", "V1"),
            "TKT-BKG-2025-0614-093005-00FF-V1"
        );
    }

    #[test]
    fn aggregate_transitions() {
        assert_eq!(aggregate_status(&[], 2), AggregateStatus::Pending);
        assert_eq!(
            aggregate_status(&[ticket(STATUS_GENERATED)], 2),
            AggregateStatus::Generating
        );
        assert_eq!(
            aggregate_status(&[ticket(STATUS_GENERATED), ticket(STATUS_GENERATED)], 2),
            AggregateStatus::Ready
        );
        assert_eq!(
            aggregate_status(&[ticket(STATUS_GENERATED), ticket(STATUS_FAILED)], 2),
            AggregateStatus::Partial
        );
        assert_eq!(
            aggregate_status(&[ticket(STATUS_DELIVERED), ticket(STATUS_GENERATED)], 2),
            AggregateStatus::Ready
        );
    }
}
