//! Human-readable duration parsing.
//!
//! Accepts either integer milliseconds or `"<number> <unit>[s]"` where unit is
//! one of second, minute, hour, day, week, month or year. Months are 30 days
//! and years are 365 days; there is no calendar awareness.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

const SECOND_MS: f64 = 1000.0;
const MINUTE_MS: f64 = SECOND_MS * 60.0;
const HOUR_MS: f64 = MINUTE_MS * 60.0;
const DAY_MS: f64 = HOUR_MS * 24.0;
const WEEK_MS: f64 = DAY_MS * 7.0;
const MONTH_MS: f64 = DAY_MS * 30.0;
const YEAR_MS: f64 = DAY_MS * 365.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration: {0}")]
    Invalid(String),
}

/// A duration as written in configuration or per-call policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Millis(u64),
    Text(String),
}

impl DurationSpec {
    /// Resolve to canonical milliseconds.
    pub fn to_millis(&self) -> Result<u64, DurationError> {
        match self {
            DurationSpec::Millis(ms) => Ok(*ms),
            DurationSpec::Text(text) => parse_duration(text),
        }
    }
}

impl From<u64> for DurationSpec {
    fn from(value: u64) -> Self {
        DurationSpec::Millis(value)
    }
}

impl From<&str> for DurationSpec {
    fn from(value: &str) -> Self {
        DurationSpec::Text(value.to_string())
    }
}

impl From<String> for DurationSpec {
    fn from(value: String) -> Self {
        DurationSpec::Text(value)
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationSpec::Millis(ms) => write!(f, "{ms}"),
            DurationSpec::Text(text) => f.write_str(text),
        }
    }
}

/// Parse `"<number> <unit>[s]"` (or a bare integer) into milliseconds.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let mut parts = input.split_whitespace();
    let (number, unit) = match (parts.next(), parts.next(), parts.next()) {
        // bare integers are already milliseconds, as environment values arrive as text
        (Some(number), None, None) => return number.parse().map_err(|_| invalid()),
        (Some(number), Some(unit), None) => (number, unit),
        _ => return Err(invalid()),
    };

    let number: f64 = number.parse().map_err(|_| invalid())?;
    if !number.is_finite() || number < 0.0 {
        return Err(invalid());
    }

    let unit = unit.strip_suffix('s').unwrap_or(unit);
    let factor = match unit {
        "second" => SECOND_MS,
        "minute" => MINUTE_MS,
        "hour" => HOUR_MS,
        "day" => DAY_MS,
        "week" => WEEK_MS,
        "month" => MONTH_MS,
        "year" => YEAR_MS,
        _ => return Err(invalid()),
    };

    let millis = (number * factor).round();
    if millis > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(millis as u64)
}
