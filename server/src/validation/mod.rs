//! Boundary validation
//!
//! Every mutating operation's input is validated here before any store is
//! touched. Failures map to the VALIDATION error kind.

use boxoffice_common::SeatLabel;

use crate::error::ApiError;

/// Maximum seats a single booking may cover.
pub const MAX_SEATS_PER_BOOKING: usize = 10;

/// Normalize and validate a seat label (trim, uppercase, `[A-Z0-9]{1,20}`).
pub fn parse_seat_label(raw: &str) -> Result<SeatLabel, ApiError> {
    SeatLabel::parse(raw).map_err(|e| ApiError::Validation(format!("Invalid seat label: {}", e)))
}

/// Validate the seat list of a booking request.
pub fn check_seat_selection_len(len: usize) -> Result<(), ApiError> {
    if len == 0 {
        return Err(ApiError::Validation(
            "At least one seat is required".to_string(),
        ));
    }
    if len > MAX_SEATS_PER_BOOKING {
        return Err(ApiError::Validation(format!(
            "A booking may cover at most {} seats",
            MAX_SEATS_PER_BOOKING
        )));
    }
    Ok(())
}

/// Positive-id check for path parameters.
pub fn check_id(name: &str, id: i64) -> Result<(), ApiError> {
    if id <= 0 {
        return Err(ApiError::Validation(format!("{} must be positive", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_validation_maps_to_validation_error() {
        assert!(parse_seat_label("v1").is_ok());
        let err = parse_seat_label("bad seat").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn selection_bounds() {
        assert!(check_seat_selection_len(0).is_err());
        assert!(check_seat_selection_len(1).is_ok());
        assert!(check_seat_selection_len(10).is_ok());
        assert!(check_seat_selection_len(11).is_err());
    }
}
