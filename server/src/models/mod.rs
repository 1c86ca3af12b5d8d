pub mod booking;
pub mod booking_seat;
pub mod event;
pub mod idempotency;
pub mod seat;
pub mod seat_type;
pub mod ticket;
pub mod token;

pub use booking::{Booking, NewBooking};
pub use booking_seat::{BookingSeat, NewBookingSeat};
pub use event::Event;
pub use idempotency::IdempotencyKey;
pub use seat::{NewSeat, Seat};
pub use seat_type::{NewSeatType, SeatType};
pub use ticket::{NewTicket, Ticket};
pub use token::{BlacklistedToken, RefreshToken};
