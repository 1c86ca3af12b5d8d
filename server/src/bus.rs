//! Lifecycle event bus
//!
//! Services publish here; the websocket broadcaster subscribes through an
//! adapter. Services have no compile-time dependency on any transport, and
//! a publish failure must never fail the mutation that produced it.
//! Implementations log and swallow.

use serde::Serialize;
use uuid::Uuid;

/// Connection that originated a mutation, when it arrived over a socket.
/// The broadcaster skips this connection when fanning out (the originator
/// gets a direct response instead).
pub type Origin = Option<Uuid>;

/// A seat lock as it appears in broadcast payloads.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub user_id: i64,
    pub locked_at: i64,
    pub expires_at: i64,
}

/// Events fanned out to every connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    EventCreated {
        event_id: i64,
    },
    EventUpdated {
        event_id: i64,
    },
    EventDeleted {
        event_id: i64,
    },
    SeatTypeCreated {
        event_id: i64,
        seat_type_id: i64,
        name: String,
        available_quantity: i32,
    },
    SeatTypeUpdated {
        event_id: i64,
        seat_type_id: i64,
        available_quantity: i32,
    },
    SeatTypeDeleted {
        event_id: i64,
        seat_type_id: i64,
    },
    SeatLocked {
        event_id: i64,
        seat_type_id: i64,
        seat_label: String,
        user_id: i64,
        available_quantity: i32,
        lock: LockInfo,
    },
    BookingCreated {
        booking_id: i64,
        event_id: i64,
        user_id: i64,
        seat_count: usize,
    },
    BookingConfirmed {
        booking_id: i64,
        event_id: i64,
    },
    BookingCancelled {
        booking_id: i64,
        event_id: i64,
    },
    TicketsReady {
        booking_id: i64,
        ticket_count: usize,
    },
}

/// Publish-side interface. `origin` identifies the websocket connection the
/// mutation came in on, if any; fan-out excludes it.
pub trait EventBus: Send + Sync {
    fn publish(&self, origin: Origin, event: BusEvent);
}

/// Bus that drops everything. Used in tests and as a stand-in before the
/// broadcaster is wired up.
#[derive(Default)]
pub struct NullBus;

impl EventBus for NullBus {
    fn publish(&self, _origin: Origin, event: BusEvent) {
        tracing::debug!(?event, "bus event dropped (no broadcaster attached)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = BusEvent::SeatLocked {
            event_id: 1,
            seat_type_id: 2,
            seat_label: "V1".to_string(),
            user_id: 42,
            available_quantity: 99,
            lock: LockInfo {
                user_id: 42,
                locked_at: 1_700_000_000,
                expires_at: 1_700_000_600,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "seat_locked");
        assert_eq!(json["seat_label"], "V1");
        assert_eq!(json["available_quantity"], 99);

        let ready = BusEvent::TicketsReady {
            booking_id: 7,
            ticket_count: 2,
        };
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["type"], "tickets_ready");
    }
}
