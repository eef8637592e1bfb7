use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::checksum::ChecksumPolicy;

/// Digits in a card number (Aadhaar scheme).
pub const ID_DIGITS: usize = 12;

/// Digits per display group.
const GROUP: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdNumberError {
    #[error("expected {ID_DIGITS} digits, got {0}")]
    WrongLength(usize),
    #[error("non-digit character in ID number")]
    NonDigit,
    #[error("checksum validation failed")]
    Checksum,
}

/// A validated identity-card number. Stored as bare digits, displayed
/// grouped 4-4-4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdNumber(String);

impl IdNumber {
    /// Parse a raw OCR token: space/hyphen separators are stripped, then
    /// digit count and the configured checksum are enforced.
    pub fn parse(raw: &str, policy: ChecksumPolicy) -> Result<Self, IdNumberError> {
        let digits: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        if digits.chars().any(|c| !c.is_ascii_digit()) {
            return Err(IdNumberError::NonDigit);
        }
        if digits.len() != ID_DIGITS {
            return Err(IdNumberError::WrongLength(digits.len()));
        }
        if !policy.validates(&digits) {
            return Err(IdNumberError::Checksum);
        }
        Ok(IdNumber(digits))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Canonical display form: `1234 5678 9012`.
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(GROUP)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// All but the last group replaced with `X`, for presentation layers
    /// that honor an ID-masking option: `XXXX XXXX 9012`.
    pub fn masked(&self) -> String {
        let visible = &self.0[ID_DIGITS - GROUP..];
        format!("XXXX XXXX {visible}")
    }
}

impl fmt::Display for IdNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.grouped())
    }
}
