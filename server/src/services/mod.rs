pub mod availability;
pub mod booking;
pub mod idempotency;
pub mod payments;
pub mod seat_lock;
pub mod seat_types;
pub mod sweeper;
pub mod ticket_generator;
pub mod token_gate;
