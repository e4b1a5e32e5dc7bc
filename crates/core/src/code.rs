//! Ambassador referral code rules.
//!
//! Codes are stored uppercase and must be unique; [`CodeValue::parse`] is the
//! only way to build one, so every code that reaches the database has already
//! been normalized.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AmbassadorCodeId, UserId};

/// Errors raised by code validation and usability checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("code cannot be empty")]
    Empty,
    #[error("code must be between {min} and {max} characters")]
    Length { min: usize, max: usize },
    #[error("code contains invalid character '{0}' (allowed: A-Z, 0-9, '-', '_')")]
    InvalidCharacter(char),
    #[error("discount percentage must be greater than 0 and at most 100")]
    DiscountOutOfRange,
    #[error("valid_until must be after valid_from")]
    InvalidWindow,
    #[error("code {0} is inactive")]
    Inactive(String),
    #[error("code {0} is not valid yet")]
    NotYetValid(String),
    #[error("code {0} has expired")]
    Expired(String),
    #[error("code {0} has reached its usage limit")]
    UsageLimitReached(String),
}

/// A normalized (trimmed, uppercase) ambassador code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeValue(String);

impl CodeValue {
    /// Shortest accepted code.
    pub const MIN_LENGTH: usize = 3;
    /// Longest accepted code.
    pub const MAX_LENGTH: usize = 32;

    /// Normalize and validate a code.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, has the wrong length, or
    /// contains characters other than ASCII letters, digits, `-` and `_`.
    ///
    /// ```
    /// use flexhub_core::CodeValue;
    ///
    /// assert_eq!(CodeValue::parse(" liftwithkim ").unwrap().as_str(), "LIFTWITHKIM");
    /// assert!(CodeValue::parse("no spaces").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let code = raw.trim().to_ascii_uppercase();

        if code.is_empty() {
            return Err(CodeError::Empty);
        }

        if let Some(bad) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CodeError::InvalidCharacter(bad));
        }

        if code.len() < Self::MIN_LENGTH || code.len() > Self::MAX_LENGTH {
            return Err(CodeError::Length {
                min: Self::MIN_LENGTH,
                max: Self::MAX_LENGTH,
            });
        }

        Ok(Self(code))
    }

    /// Build a code from the ambassador's name and a numeric suffix.
    ///
    /// Uses up to eight letters/digits of the name, falling back to `FLEX`
    /// for names without any.
    #[must_use]
    pub fn suggest(name: &str, suffix: u16) -> Self {
        let prefix: String = name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect::<String>()
            .to_ascii_uppercase();
        let prefix = if prefix.is_empty() {
            "FLEX".to_owned()
        } else {
            prefix
        };

        Self(format!("{prefix}{:04}", suffix % 10_000))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CodeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CodeValue {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CodeValue> for String {
    fn from(code: CodeValue) -> Self {
        code.0
    }
}

/// Validate a discount percentage (0 < p ≤ 100).
///
/// # Errors
///
/// Returns `CodeError::DiscountOutOfRange` when outside the range.
pub fn validate_discount_percentage(percentage: Decimal) -> Result<(), CodeError> {
    if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(CodeError::DiscountOutOfRange);
    }
    Ok(())
}

/// Validate a validity window.
///
/// # Errors
///
/// Returns `CodeError::InvalidWindow` when the window ends before it starts.
pub fn validate_window(
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
) -> Result<(), CodeError> {
    match valid_until {
        Some(until) if until <= valid_from => Err(CodeError::InvalidWindow),
        _ => Ok(()),
    }
}

/// The terms of a stored code needed to decide whether it can be redeemed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTerms {
    pub id: AmbassadorCodeId,
    pub ambassador_id: UserId,
    pub code: String,
    pub discount_percentage: Decimal,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub times_used: i32,
    pub usage_limit: Option<i32>,
}

impl CodeTerms {
    /// Check that the code can be redeemed at `at`.
    ///
    /// # Errors
    ///
    /// Returns the first failed condition: inactive, outside its validity
    /// window, or over its usage limit.
    pub fn check_usable(&self, at: DateTime<Utc>) -> Result<(), CodeError> {
        if !self.is_active {
            return Err(CodeError::Inactive(self.code.clone()));
        }
        if at < self.valid_from {
            return Err(CodeError::NotYetValid(self.code.clone()));
        }
        if self.valid_until.is_some_and(|until| at >= until) {
            return Err(CodeError::Expired(self.code.clone()));
        }
        if self
            .usage_limit
            .is_some_and(|limit| self.times_used >= limit)
        {
            return Err(CodeError::UsageLimitReached(self.code.clone()));
        }
        Ok(())
    }
}
