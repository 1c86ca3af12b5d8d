//! Seat label type
//!
//! A seat label is an opaque short identifier within a seat-type namespace
//! ("V1", "A12"). Labels are normalized to uppercase and must match
//! `[A-Z0-9]{1,20}` before any store write.

use serde::{Deserialize, Serialize};

/// Maximum label length after trimming.
pub const MAX_LABEL_LEN: usize = 20;

/// A validated, uppercased seat label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatLabel(String);

impl SeatLabel {
    /// Normalize and validate a raw label.
    ///
    /// Trims surrounding whitespace, uppercases, then enforces
    /// `[A-Z0-9]{1,20}`. Anything else is rejected.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(LabelError::Empty);
        }
        if normalized.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong(normalized.len()));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(LabelError::InvalidChars);
        }
        Ok(SeatLabel(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SeatLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SeatLabel {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SeatLabel::parse(&value)
    }
}

impl From<SeatLabel> for String {
    fn from(label: SeatLabel) -> String {
        label.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    Empty,
    TooLong(usize),
    InvalidChars,
}

impl std::fmt::Display for LabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelError::Empty => write!(f, "seat label is empty"),
            LabelError::TooLong(len) => write!(
                f,
                "seat label is {} characters, maximum is {}",
                len, MAX_LABEL_LEN
            ),
            LabelError::InvalidChars => {
                write!(f, "seat label may only contain A-Z and 0-9")
            }
        }
    }
}

impl std::error::Error for LabelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(SeatLabel::parse("  v12 ").unwrap().as_str(), "V12");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(SeatLabel::parse(""), Err(LabelError::Empty));
        assert_eq!(SeatLabel::parse("   "), Err(LabelError::Empty));
        assert_eq!(SeatLabel::parse("A-1"), Err(LabelError::InvalidChars));
        assert_eq!(SeatLabel::parse("A 1"), Err(LabelError::InvalidChars));
        assert_eq!(SeatLabel::parse("Ä1"), Err(LabelError::InvalidChars));
        assert!(matches!(
            SeatLabel::parse(&"A".repeat(21)),
            Err(LabelError::TooLong(21))
        ));
    }

    #[test]
    fn boundary_lengths_accepted() {
        assert!(SeatLabel::parse("A").is_ok());
        assert!(SeatLabel::parse(&"A".repeat(20)).is_ok());
    }

    #[test]
    fn serde_round_trip_enforces_validation() {
        let ok: SeatLabel = serde_json::from_str("\"v1\"").unwrap();
        assert_eq!(ok.as_str(), "V1");
        assert!(serde_json::from_str::<SeatLabel>("\"bad label\"").is_err());
    }
}
