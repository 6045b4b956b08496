// ABOUTME: Domain normalization and key identifier parsing
// ABOUTME: Shared by every component that accepts a domain or a KID as input
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Domain normalization and KID structure.
//!
//! A domain is an opaque non-empty tenant identifier. It is normalized to
//! upper case with surrounding whitespace trimmed before any storage or
//! lookup, and must match `[A-Z0-9_-]+` after normalization.
//!
//! A KID (key identifier) is `DOMAIN-YYYYMMDD-HHMMSS-HEX8`, where `HEX8`
//! is 8 upper-case hex digits of 4 cryptographically random bytes.
//! Uniqueness is statistical plus temporal; monotonicity is not required.

use crate::errors::AppError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z0-9_-]+$").unwrap_or_else(|e| {
            unreachable!("domain pattern is a fixed literal: {e}")
        })
    })
}

fn kid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Z0-9_-]+)-(\d{8})-(\d{6})-([A-F0-9]{8})$").unwrap_or_else(|e| {
            unreachable!("kid pattern is a fixed literal: {e}")
        })
    })
}

/// Normalize a domain: trim whitespace, upper-case, and validate shape.
///
/// # Errors
///
/// Returns [`crate::errors::ErrorKind::InvalidArgument`] if the trimmed,
/// upper-cased value is empty or does not match `[A-Z0-9_-]+`.
pub fn normalize_domain(raw: &str) -> Result<String, AppError> {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(AppError::invalid_argument("domain must not be empty"));
    }
    if !domain_pattern().is_match(&normalized) {
        return Err(AppError::invalid_argument(format!(
            "domain '{normalized}' must match [A-Z0-9_-]+"
        )));
    }
    Ok(normalized)
}

/// The parsed structure of a KID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKid {
    /// The normalized domain this KID belongs to.
    pub domain: String,
    /// The calendar date component.
    pub date: NaiveDate,
    /// The time-of-day component.
    pub time: NaiveTime,
    /// The 8-hex-digit nonce.
    pub unique_id: String,
}

impl ParsedKid {
    /// The combined creation timestamp implied by the KID, in UTC.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(self.date.and_time(self.time), Utc)
    }
}

/// Parse a KID of the form `DOMAIN-YYYYMMDD-HHMMSS-HEX8`.
///
/// Returns `None` if the KID does not match the expected shape; this is a
/// pure, non-suspending operation with no I/O.
#[must_use]
pub fn parse_kid(kid: &str) -> Option<ParsedKid> {
    let caps = kid_pattern().captures(kid)?;
    let domain = caps.get(1)?.as_str().to_owned();
    let date_str = caps.get(2)?.as_str();
    let time_str = caps.get(3)?.as_str();
    let unique_id = caps.get(4)?.as_str().to_owned();

    let date = NaiveDate::parse_from_str(date_str, "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(time_str, "%H%M%S").ok()?;

    Some(ParsedKid {
        domain,
        date,
        time,
        unique_id,
    })
}

/// Extract just the domain segment of a KID without full validation of the
/// timestamp components. Used by callers that only need to route by domain.
///
/// # Errors
///
/// Returns [`crate::errors::ErrorKind::InvalidArgument`] if the KID does
/// not parse.
pub fn domain_of_kid(kid: &str) -> Result<String, AppError> {
    parse_kid(kid)
        .map(|p| p.domain)
        .ok_or_else(|| AppError::invalid_argument(format!("malformed kid: {kid}")))
}
