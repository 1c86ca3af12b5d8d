//! Event model (read-only within the core)
//!
//! Event CRUD lives outside the booking engine; the core only checks that
//! an event is open for sale before accepting a lock.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::events;

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_PUBLISHED: &str = "published";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: i64,
    pub organizer_id: i64,
    pub name: String,
    pub status: String,
    pub start_date: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Event {
    pub fn find(conn: &mut PgConnection, event_id: i64) -> QueryResult<Option<Event>> {
        events::table
            .filter(events::id.eq(event_id))
            .first(conn)
            .optional()
    }

    /// Sales are open while the event is published and has not started.
    pub fn is_open_for_sale(&self, now: NaiveDateTime) -> bool {
        self.status == STATUS_PUBLISHED && self.start_date > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event_with(status: &str, start_offset: Duration) -> Event {
        let now = Utc::now().naive_utc();
        Event {
            id: 1,
            organizer_id: 10,
            name: "Summer Gig".to_string(),
            status: status.to_string(),
            start_date: now + start_offset,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_published_future_events_sell() {
        let now = Utc::now().naive_utc();
        assert!(event_with(STATUS_PUBLISHED, Duration::hours(2)).is_open_for_sale(now));
        assert!(!event_with(STATUS_DRAFT, Duration::hours(2)).is_open_for_sale(now));
        assert!(!event_with(STATUS_CANCELLED, Duration::hours(2)).is_open_for_sale(now));
        assert!(!event_with(STATUS_PUBLISHED, Duration::hours(-1)).is_open_for_sale(now));
    }
}
