// ABOUTME: Centralized error handling and error types for the key lifecycle service
// ABOUTME: Defines the error kind taxonomy used across rotation, storage, and signing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Unified Error Handling System
//!
//! Errors are tagged with an [`ErrorKind`] rather than modeled as one
//! variant per failure site. The taxonomy mirrors the propagation policy:
//! `Conflict` is swallowed to a benign `None` by the rotator, `Transient`
//! is retried by the scheduler, and `IntegrityViolation` always
//! propagates to the scheduler boundary where it is counted as failed.

use std::fmt;
use thiserror::Error;

/// Error kind taxonomy (kinds, not one variant per call site).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad domain shape, non-object payload, non-positive TTL, missing callback.
    InvalidArgument,
    /// Missing KID, missing domain directory, missing active KID when one is required.
    NotFound,
    /// Lease not acquired; benign, surfaces as a `null`/`None` return at the rotator boundary.
    Conflict,
    /// An invariant the system relies on does not hold; must propagate.
    IntegrityViolation,
    /// An I/O or external-collaborator error the caller may retry.
    Transient,
    /// A cryptographic primitive (import or sign) failed.
    Fatal,
}

impl ErrorKind {
    /// Short machine-stable tag, used in logs and `Display`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::IntegrityViolation => "integrity_violation",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application error type used throughout the crate.
#[derive(Debug, Clone, Error)]
pub struct AppError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl AppError {
    /// Create a new `AppError` with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Invalid argument (bad domain, payload shape, TTL, missing callback).
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Resource not found.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorKind::NotFound, format!("{resource} not found"))
    }

    /// Lock/lease not acquired.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// An invariant the system relies on does not hold.
    #[must_use]
    pub fn integrity_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityViolation, message)
    }

    /// Retryable I/O or external-collaborator failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Cryptographic primitive failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// True if this error is an invariant violation that must propagate
    /// rather than being collapsed to a benign result.
    #[must_use]
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::IntegrityViolation)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type alias for convenience.
pub type AppResult<T> = Result<T, AppError>;

/// Conversion from `std::io::Error` to `AppError`.
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(error.to_string()),
            _ => Self::transient(format!("IO error: {error}")),
        }
    }
}

/// Conversion from `serde_json::Error` to `AppError`.
impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::invalid_argument(format!("JSON error: {error}"))
    }
}

/// Conversion from `rsa::Error` to `AppError`.
impl From<rsa::Error> for AppError {
    fn from(error: rsa::Error) -> Self {
        Self::fatal(format!("RSA error: {error}"))
    }
}

/// Conversion from `rsa::pkcs8::Error` (private key PEM parsing) to `AppError`.
impl From<rsa::pkcs8::Error> for AppError {
    fn from(error: rsa::pkcs8::Error) -> Self {
        Self::fatal(format!("PKCS#8 error: {error}"))
    }
}

/// Conversion from `rsa::pkcs1::Error` (public key PEM parsing) to `AppError`.
impl From<rsa::pkcs1::Error> for AppError {
    fn from(error: rsa::pkcs1::Error) -> Self {
        Self::fatal(format!("PKCS#1 error: {error}"))
    }
}

/// Conversion from `rsa::spki::Error` (public key SPKI parsing) to `AppError`.
impl From<rsa::pkcs8::spki::Error> for AppError {
    fn from(error: rsa::pkcs8::spki::Error) -> Self {
        Self::fatal(format!("SPKI error: {error}"))
    }
}

/// Conversion from `chrono::ParseError` to `AppError`.
impl From<chrono::ParseError> for AppError {
    fn from(error: chrono::ParseError) -> Self {
        Self::invalid_argument(format!("Date parse error: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, ErrorKind};

    #[test]
    fn integrity_violation_is_flagged() {
        let err = AppError::integrity_violation("no active kid after rollback");
        assert!(err.is_integrity_violation());
        assert_eq!(err.kind, ErrorKind::IntegrityViolation);
    }

    #[test]
    fn other_kinds_are_not_flagged() {
        assert!(!AppError::conflict("lease held").is_integrity_violation());
        assert!(!AppError::not_found("kid").is_integrity_violation());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = AppError::invalid_argument("bad domain");
        assert_eq!(err.to_string(), "invalid_argument: bad domain");
    }
}
