//! Money amounts and conversion utilities
//!
//! Prices and booking totals are `rust_decimal::Decimal` end to end; the
//! payment provider's wire format is integer minor units (paise/cents).
//! Binary floating point never touches an amount comparison.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tolerance for amount-match checks against the provider (±0.01).
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Currencies accepted on the payment wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    INR,
    USD,
    EUR,
}

impl Currency {
    /// Currency code as it appears on the provider wire
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }

    /// Smallest-unit name, for display and logging
    pub fn minor_unit(&self) -> &'static str {
        match self {
            Currency::INR => "paise",
            Currency::USD => "cents",
            Currency::EUR => "cents",
        }
    }

    /// Conversion factor from major to minor units
    pub fn minor_factor(&self) -> i64 {
        100
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INR" => Ok(Currency::INR),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            _ => Err(format!("Unsupported currency: {}", s)),
        }
    }
}

/// Convert a decimal major-unit amount to integer minor units.
///
/// Returns `None` when the amount has sub-minor precision (e.g. 500.005)
/// or does not fit in `i64`; callers reject such amounts at the boundary.
pub fn to_minor_units(amount: Decimal, currency: Currency) -> Option<i64> {
    let scaled = amount.checked_mul(Decimal::from(currency.minor_factor()))?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    scaled.to_i64()
}

/// Convert integer minor units back into a decimal major-unit amount.
pub fn from_minor_units(minor: i64, currency: Currency) -> Decimal {
    Decimal::from(minor) / Decimal::from(currency.minor_factor())
}

/// Amount-match check used against provider payloads: |a − b| ≤ 0.01.
pub fn amounts_match(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= AMOUNT_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_unit_round_trip() {
        let amount = dec!(500.00);
        let minor = to_minor_units(amount, Currency::INR).unwrap();
        assert_eq!(minor, 50_000);
        assert_eq!(from_minor_units(minor, Currency::INR), amount);
    }

    #[test]
    fn sub_minor_precision_rejected() {
        assert_eq!(to_minor_units(dec!(500.005), Currency::INR), None);
    }

    #[test]
    fn tolerance_window() {
        assert!(amounts_match(dec!(500.00), dec!(500.00)));
        assert!(amounts_match(dec!(500.00), dec!(500.01)));
        assert!(amounts_match(dec!(500.01), dec!(500.00)));
        assert!(!amounts_match(dec!(500.00), dec!(500.02)));
    }

    #[test]
    fn no_float_drift_on_large_amounts() {
        // 9,999,999.99 in paise must be exact
        let minor = to_minor_units(dec!(9999999.99), Currency::INR).unwrap();
        assert_eq!(minor, 999_999_999);
    }
}
