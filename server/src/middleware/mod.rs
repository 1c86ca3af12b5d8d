pub mod auth;
pub mod correlation;

pub use auth::{authed_user, AuthedUser, RequireAuth};
pub use correlation::{Correlate, CorrelationId};
