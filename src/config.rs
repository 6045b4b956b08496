// ABOUTME: Typed runtime configuration and the ConfigUpdater capability
// ABOUTME: Replaces ad hoc global mutable fields with one struct and an atomic update path
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Loading configuration from files or environment is outside this
//! crate's scope, but the scheduler, signer, and janitor still need a
//! typed, validated settings surface at runtime. Per the design note on
//! global mutable state, updates go through [`ConfigUpdater`] rather than
//! writing individual fields directly: every field in an update is
//! validated before any of them is committed, so a partially invalid
//! update never corrupts the live settings.

use crate::errors::{AppError, AppResult};
use std::env;
use tokio::sync::RwLock;

/// Lower bound accepted for `retry_interval_ms`.
pub const MIN_RETRY_INTERVAL_MS: u64 = 60_000;
/// Upper bound accepted for `retry_interval_ms`.
pub const MAX_RETRY_INTERVAL_MS: u64 = 600_000;
/// Lower bound accepted for `max_retries`.
pub const MIN_RETRIES: u32 = 1;
/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Runtime-tunable settings consumed by the scheduler, signer, and
/// janitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Sleep between scheduler retry attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Maximum scheduler sweep attempts before giving up for this cycle.
    pub max_retries: u32,
    /// Interval between a key's retirement and its reaping, in
    /// milliseconds.
    pub grace_period_ms: u64,
    /// Default token TTL the signer applies when the caller does not
    /// specify one, in seconds.
    pub signer_default_ttl_secs: u64,
    /// Maximum canonical-serialized payload size the signer accepts, in
    /// bytes.
    pub signer_max_payload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_interval_ms: 60_000,
            max_retries: 3,
            grace_period_ms: 7 * 24 * 60 * 60 * 1000,
            signer_default_ttl_secs: 2_592_000,
            signer_max_payload_bytes: 4096,
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to
    /// [`Settings::default`] for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_interval_ms: env_u64("KEYFORGE_RETRY_INTERVAL_MS", defaults.retry_interval_ms),
            max_retries: env_u32("KEYFORGE_MAX_RETRIES", defaults.max_retries),
            grace_period_ms: env_u64("KEYFORGE_GRACE_PERIOD_MS", defaults.grace_period_ms),
            signer_default_ttl_secs: env_u64(
                "KEYFORGE_SIGNER_DEFAULT_TTL_SECS",
                defaults.signer_default_ttl_secs,
            ),
            signer_max_payload_bytes: env_u64(
                "KEYFORGE_SIGNER_MAX_PAYLOAD_BYTES",
                defaults.signer_max_payload_bytes as u64,
            ) as usize,
        }
    }

    /// Validate this settings value. Called by [`ConfigUpdater::update`]
    /// before any field is committed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] on the first
    /// field that fails its constraint.
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_RETRY_INTERVAL_MS..=MAX_RETRY_INTERVAL_MS).contains(&self.retry_interval_ms) {
            return Err(AppError::invalid_argument(format!(
                "retry_interval_ms must be in [{MIN_RETRY_INTERVAL_MS}, {MAX_RETRY_INTERVAL_MS}]"
            )));
        }
        if !(MIN_RETRIES..=MAX_RETRIES).contains(&self.max_retries) {
            return Err(AppError::invalid_argument(format!(
                "max_retries must be in [{MIN_RETRIES}, {MAX_RETRIES}]"
            )));
        }
        if self.signer_default_ttl_secs == 0 {
            return Err(AppError::invalid_argument(
                "signer_default_ttl_secs must be positive",
            ));
        }
        if self.signer_max_payload_bytes == 0 {
            return Err(AppError::invalid_argument(
                "signer_max_payload_bytes must be positive",
            ));
        }
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Guards [`Settings`] behind a capability that validates a whole update
/// before committing any field of it.
pub struct ConfigUpdater {
    settings: RwLock<Settings>,
}

impl ConfigUpdater {
    /// Wrap an already-validated `Settings` value.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// A snapshot of the current settings.
    pub async fn current(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Validate `next` in full, then atomically replace the live
    /// settings. No partial update is ever visible to readers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `next`
    /// fails validation; the live settings are left unchanged.
    pub async fn update(&self, next: Settings) -> AppResult<()> {
        next.validate()?;
        *self.settings.write().await = next;
        Ok(())
    }
}
