//! Boundary validation tests
//!
//! Seat labels and money amounts must be rejected before any store write.

use boxoffice_common::{amounts_match, from_minor_units, to_minor_units, Currency, SeatLabel};
use rust_decimal_macros::dec;

mod seat_labels {
    use super::*;

    #[test]
    fn trim_and_uppercase_before_matching() {
        for (raw, expected) in [("v1", "V1"), ("  a12  ", "A12"), ("B007", "B007")] {
            assert_eq!(SeatLabel::parse(raw).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn rejects_everything_outside_the_alphabet() {
        let bad = [
            "", "   ", "V-1", "V 1", "V_1", "v1!", "Ä1", "席1", "V1\n", "\tV1x\u{0}",
        ];
        for raw in bad {
            assert!(
                SeatLabel::parse(raw).is_err(),
                "label {:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn length_bounds() {
        assert!(SeatLabel::parse(&"Z".repeat(20)).is_ok());
        assert!(SeatLabel::parse(&"Z".repeat(21)).is_err());
    }

    #[test]
    fn validation_happens_ahead_of_any_store_write() {
        // The server-side wrapper maps to the VALIDATION wire code.
        let err = server::validation::parse_seat_label("no good").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn selection_size_bounds() {
        assert!(server::validation::check_seat_selection_len(0).is_err());
        assert!(server::validation::check_seat_selection_len(10).is_ok());
        assert!(server::validation::check_seat_selection_len(11).is_err());
    }
}

mod amounts {
    use super::*;

    #[test]
    fn tolerance_is_one_minor_unit() {
        assert!(amounts_match(dec!(500.00), dec!(500.01)));
        assert!(!amounts_match(dec!(500.00), dec!(500.02)));
        assert!(amounts_match(dec!(0.00), dec!(0.01)));
    }

    #[test]
    fn minor_units_are_exact() {
        assert_eq!(to_minor_units(dec!(500.00), Currency::INR), Some(50_000));
        assert_eq!(to_minor_units(dec!(0.01), Currency::INR), Some(1));
        assert_eq!(to_minor_units(dec!(500.005), Currency::INR), None);
        assert_eq!(from_minor_units(50_000, Currency::INR), dec!(500.00));
    }

    #[test]
    fn webhook_amount_check_uses_decimals_not_floats() {
        // 4503.59 is a classic float-drift amount; the decimal path must
        // compare exactly.
        let expected = dec!(4503.59);
        let paid = from_minor_units(450_359, Currency::INR);
        assert!(amounts_match(paid, expected));
        assert!(!amounts_match(from_minor_units(450_361, Currency::INR), expected));
    }
}
