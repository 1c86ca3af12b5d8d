//! Booking state machine tests
//!
//! Offline verification of the transition rules the coordinator enforces:
//! valid transitions, blocked transitions, terminal states, and the
//! payment-status coupling.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Cancelled)
    }

    /// Transitions reachable through public operations.
    fn valid_transitions(&self) -> Vec<BookingStatus> {
        match self {
            // Verified payment confirms; user request or timeout cancels.
            BookingStatus::Pending => vec![BookingStatus::Confirmed, BookingStatus::Cancelled],
            // Terminal modulo administrative refund marking (out of scope).
            BookingStatus::Confirmed => vec![],
            BookingStatus::Cancelled => vec![],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

const ALL: [BookingStatus; 3] = [
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::Cancelled,
];

#[test]
fn status_strings_match_persisted_values() {
    assert_eq!(BookingStatus::Pending.as_str(), server::models::booking::STATUS_PENDING);
    assert_eq!(
        BookingStatus::Confirmed.as_str(),
        server::models::booking::STATUS_CONFIRMED
    );
    assert_eq!(
        BookingStatus::Cancelled.as_str(),
        server::models::booking::STATUS_CANCELLED
    );
}

#[test]
fn confirmed_is_terminal() {
    // No public operation may take a confirmed booking anywhere else.
    assert!(BookingStatus::Confirmed.is_terminal());
    assert!(BookingStatus::Confirmed.valid_transitions().is_empty());
}

#[test]
fn no_transition_reaches_pending() {
    for status in ALL {
        assert!(
            !status.valid_transitions().contains(&BookingStatus::Pending),
            "{:?} must not transition back to pending",
            status
        );
    }
}

#[test]
fn only_pending_is_mutable() {
    for status in ALL {
        let mutable = !status.valid_transitions().is_empty();
        assert_eq!(
            mutable,
            status == BookingStatus::Pending,
            "{:?} mutability mismatch",
            status
        );
    }
}

#[test]
fn every_status_reachable_from_pending() {
    let mut reachable: HashSet<BookingStatus> = HashSet::new();
    let mut frontier = vec![BookingStatus::Pending];
    while let Some(status) = frontier.pop() {
        if reachable.insert(status) {
            frontier.extend(status.valid_transitions());
        }
    }
    for status in ALL {
        assert!(reachable.contains(&status), "{:?} unreachable", status);
    }
}

mod seat_lifecycle {
    /// Seat rows: created locked, extended, deleted, or booked. Booked is
    /// terminal for the event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SeatState {
        Absent,
        Locked,
        Booked,
    }

    #[derive(Debug, Clone, Copy)]
    enum SeatOp {
        Acquire,
        Extend,
        Release,
        ExpirySweep,
        Confirm,
    }

    fn apply(state: SeatState, op: SeatOp) -> Option<SeatState> {
        match (state, op) {
            (SeatState::Absent, SeatOp::Acquire) => Some(SeatState::Locked),
            (SeatState::Locked, SeatOp::Extend) => Some(SeatState::Locked),
            (SeatState::Locked, SeatOp::Release) => Some(SeatState::Absent),
            (SeatState::Locked, SeatOp::ExpirySweep) => Some(SeatState::Absent),
            (SeatState::Locked, SeatOp::Confirm) => Some(SeatState::Booked),
            _ => None,
        }
    }

    #[test]
    fn acquire_only_from_absent() {
        assert_eq!(apply(SeatState::Absent, SeatOp::Acquire), Some(SeatState::Locked));
        assert_eq!(apply(SeatState::Locked, SeatOp::Acquire), None);
        assert_eq!(apply(SeatState::Booked, SeatOp::Acquire), None);
    }

    #[test]
    fn booked_is_terminal() {
        for op in [
            SeatOp::Acquire,
            SeatOp::Extend,
            SeatOp::Release,
            SeatOp::ExpirySweep,
            SeatOp::Confirm,
        ] {
            assert_eq!(apply(SeatState::Booked, op), None, "{:?} must not move a booked seat", op);
        }
    }

    #[test]
    fn release_and_sweep_restore_absence() {
        assert_eq!(apply(SeatState::Locked, SeatOp::Release), Some(SeatState::Absent));
        assert_eq!(apply(SeatState::Locked, SeatOp::ExpirySweep), Some(SeatState::Absent));
        // A fresh acquire then succeeds.
        assert_eq!(apply(SeatState::Absent, SeatOp::Acquire), Some(SeatState::Locked));
    }
}
