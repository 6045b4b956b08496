// ABOUTME: Thin facade from a domain to its active KID and signing material
// ABOUTME: Every entry point normalizes the domain input first
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The facade the [`crate::signer::Signer`] and [`crate::rotator::Rotator`]
//! use instead of reaching into the [`ActiveKidRegistry`] and
//! [`KeyRepository`] directly.

use crate::active_registry::ActiveKidRegistry;
use crate::domain::normalize_domain;
use crate::errors::AppResult;
use crate::key_repository::KeyRepository;
use std::sync::Arc;

/// Resolves a domain to its active KID and signing material.
pub struct KeyResolver {
    registry: Arc<ActiveKidRegistry>,
    repository: Arc<KeyRepository>,
}

impl KeyResolver {
    /// Construct a resolver over the given registry and repository.
    #[must_use]
    pub fn new(registry: Arc<ActiveKidRegistry>, repository: Arc<KeyRepository>) -> Self {
        Self {
            registry,
            repository,
        }
    }

    /// The active KID for `domain`, or `None` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `domain`
    /// does not normalize.
    pub fn active_kid(&self, domain: &str) -> AppResult<Option<String>> {
        let normalized = normalize_domain(domain)?;
        Ok(self.registry.get_active(&normalized))
    }

    /// The private PEM for the active KID of `domain`. Loads the PEM but
    /// does not parse it to a signing handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::NotFound`] if `domain` has no
    /// active KID, or propagates a storage error.
    pub async fn signing_key(&self, domain: &str) -> AppResult<String> {
        let normalized = normalize_domain(domain)?;
        let kid = self
            .registry
            .get_active(&normalized)
            .ok_or_else(|| crate::errors::AppError::not_found(format!("active key for domain '{normalized}'")))?;
        self.repository.read_private_pem(&kid).await
    }

    /// Set the active KID for `domain`. Pass-through to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `domain`
    /// does not normalize.
    pub fn set_active(&self, domain: &str, kid: &str) -> AppResult<String> {
        let normalized = normalize_domain(domain)?;
        Ok(self.registry.set_active(&normalized, kid))
    }

    /// Clear the active KID for `domain`. Pass-through to the registry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `domain`
    /// does not normalize.
    pub fn clear_active(&self, domain: &str) -> AppResult<()> {
        let normalized = normalize_domain(domain)?;
        self.registry.clear_active(&normalized);
        Ok(())
    }
}
