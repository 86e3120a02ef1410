//! Conversions between raw byte counts / durations and the suffixed strings
//! operators type on the command line or read in reports.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;
const PIB: u64 = TIB * 1024;

const MINUTE: u64 = 60;
const HOUR: u64 = MINUTE * 60;
const DAY: u64 = HOUR * 24;

/// lowercase size suffix -> multiplier, all binary multiples; `b` lets rendered sizes parse back
static SIZE_SUFFIXES: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    HashMap::from([
        ("b", 1),
        ("k", KIB),
        ("kb", KIB),
        ("kib", KIB),
        ("m", MIB),
        ("mb", MIB),
        ("mib", MIB),
        ("g", GIB),
        ("gb", GIB),
        ("gib", GIB),
        ("t", TIB),
        ("tb", TIB),
        ("tib", TIB),
        ("p", PIB),
        ("pb", PIB),
        ("pib", PIB),
    ])
});

/// lowercase duration suffix -> seconds
static DURATION_SUFFIXES: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    HashMap::from([
        ("m", MINUTE),
        ("minute", MINUTE),
        ("minutes", MINUTE),
        ("h", HOUR),
        ("hour", HOUR),
        ("hours", HOUR),
        ("d", DAY),
        ("day", DAY),
        ("days", DAY),
    ])
});

const SIZE_UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
const DURATION_UNITS: [(&str, u64); 4] = [
    ("day(s)", DAY),
    ("hour(s)", HOUR),
    ("minute(s)", MINUTE),
    ("second(s)", 1),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("invalid value `{0}`")]
    InvalidValue(String),
    #[error("invalid suffix `{suffix}` in `{input}`")]
    InvalidSuffix { input: String, suffix: String },
    #[error("`{0}` is too large")]
    Overflow(String),
}

fn parse_suffixed(input: &str, suffixes: &HashMap<&'static str, u64>) -> Result<u64, UnitError> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(digits_end);

    let value: u64 = digits
        .parse()
        .map_err(|_| UnitError::InvalidValue(input.to_string()))?;

    let suffix = suffix.trim_start();
    if suffix.is_empty() {
        return Ok(value);
    }

    let multiplier = suffixes
        .get(suffix.to_lowercase().as_str())
        .ok_or_else(|| UnitError::InvalidSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

    value
        .checked_mul(*multiplier)
        .ok_or_else(|| UnitError::Overflow(input.to_string()))
}

/// Parses a byte count such as `4096`, `512m` or `12GiB`.
pub fn parse_size(input: &str) -> Result<u64, UnitError> {
    parse_suffixed(input, &SIZE_SUFFIXES)
}

/// Parses a duration such as `30`, `5m`, `2 hours` or `1d`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, UnitError> {
    parse_suffixed(input, &DURATION_SUFFIXES).map(Duration::from_secs)
}

/// Renders a byte count with the largest binary unit that keeps the number above 1000,
/// e.g. `8192MiB` for 8 GiB.
///
/// The amount is rounded to nearest, except where that would no longer fit a
/// `u64` once multiplied back; those round down so the output always parses.
pub fn readable_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while unit < SIZE_UNITS.len() - 1 && value / 1024.0 > 1000.0 {
        value /= 1024.0;
        unit += 1;
    }
    let multiplier = KIB.pow(unit as u32);
    let mut amount = value.round() as u64;
    if amount.checked_mul(multiplier).is_none() {
        amount = bytes / multiplier;
    }
    format!("{amount}{}", SIZE_UNITS[unit])
}

/// Renders whole seconds as days down to seconds, starting at the first nonzero unit.
pub fn readable_duration(duration: Duration) -> String {
    let mut remaining = duration.as_secs();
    let mut parts = Vec::new();
    for (name, seconds) in DURATION_UNITS {
        let amount = remaining / seconds;
        remaining %= seconds;
        if amount != 0 || !parts.is_empty() {
            parts.push(format!("{amount} {name}"));
        }
    }
    if parts.is_empty() {
        return "0 second(s)".to_string();
    }
    parts.join(", ")
}
