// ABOUTME: Deterministic cleanup of key artifacts, metadata, and caches
// ABOUTME: The expired-key reaper; safe to run concurrently with signing and JWKS builds
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The janitor deletes artifacts and invalidates caches through the
//! shared [`CacheIndex`], and runs the reaper sweep over expired archive
//! records. Reads racing a reap either see the still-present file or a
//! fresh `NotFound`, which is an acceptable outcome for an expired KID.

use crate::cache::CacheIndex;
use crate::errors::AppResult;
use crate::key_repository::KeyRepository;
use crate::metadata::MetadataManager;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Deletes key artifacts/metadata and invalidates their caches.
pub struct Janitor {
    repository: Arc<KeyRepository>,
    metadata: Arc<MetadataManager>,
    cache_index: Arc<CacheIndex>,
    grace_period: Duration,
}

impl Janitor {
    /// Construct a janitor. `grace_period_ms` is the interval between a
    /// key's retirement and its reaping.
    #[must_use]
    pub fn new(
        repository: Arc<KeyRepository>,
        metadata: Arc<MetadataManager>,
        cache_index: Arc<CacheIndex>,
        grace_period_ms: u64,
    ) -> Self {
        Self {
            repository,
            metadata,
            cache_index,
            grace_period: Duration::milliseconds(i64::try_from(grace_period_ms).unwrap_or(i64::MAX)),
        }
    }

    /// Delete the private PEM for `kid` and invalidate its cache entries
    /// (the private-PEM cache and the parsed-signing-key cache).
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_private(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.repository.delete_private(domain, kid).await?;
        self.cache_index.invalidate(kid);
        Ok(())
    }

    /// Delete the public PEM for `kid` and invalidate its cache entries
    /// (the public-PEM cache and the JWK cache).
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_public(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.repository.delete_public(domain, kid).await?;
        self.cache_index.invalidate(kid);
        Ok(())
    }

    /// Compute `expired_at := now + grace_period` and write the archive
    /// record via [`MetadataManager::add_expiry`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn add_key_expiry(&self, domain: &str, kid: &str) -> AppResult<()> {
        let expires_at = Utc::now() + self.grace_period;
        self.metadata.add_expiry(domain, kid, expires_at).await?;
        Ok(())
    }

    /// Idempotently delete the origin metadata for `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_origin_metadata(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.metadata.delete_origin(domain, kid).await
    }

    /// Idempotently delete the archive metadata for `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_archived_metadata(&self, kid: &str) -> AppResult<()> {
        self.metadata.delete_archive(kid).await
    }

    /// The reaper: for every archive record whose `expired_at` has
    /// passed, delete the public PEM and the archive record. Each
    /// record's cleanup is isolated — a failure on one record is logged
    /// and does not abort the sweep.
    pub async fn clean_domain(&self) {
        let expired = match self.metadata.list_expired(Utc::now()).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list expired keys; skipping this sweep");
                return;
            }
        };

        for record in expired {
            if let Err(e) = self.delete_public(&record.domain, &record.kid).await {
                tracing::warn!(kid = %record.kid, error = %e, "failed to delete public key during reap");
                continue;
            }
            if let Err(e) = self.delete_archived_metadata(&record.kid).await {
                tracing::warn!(kid = %record.kid, error = %e, "failed to delete archive metadata during reap");
            }
        }
    }
}
