// ABOUTME: Canonical PEM storage plus a layered, process-authoritative read cache
// ABOUTME: The only component that writes or lists key material on disk
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Storage and caching for the two PEM artifacts (`private`, `public`)
//! that make up a key pair. The cache is authoritative for the process: a
//! cached PEM may still be returned after the underlying file has been
//! removed, so concurrent reads stay graceful while reaping runs. Callers
//! that need fresh truth invalidate explicitly (the [`crate::janitor`]
//! does, on every delete).

use crate::blob_store::{BlobStore, PRIVATE_MODE, PUBLIC_MODE};
use crate::domain::domain_of_kid;
use crate::errors::AppResult;
use dashmap::DashMap;
use std::sync::Arc;

fn private_path(domain: &str, kid: &str) -> String {
    format!("keys/{domain}/private/{kid}.pem")
}

fn public_path(domain: &str, kid: &str) -> String {
    format!("keys/{domain}/public/{kid}.pem")
}

/// PEM storage with an independent private and public read cache, both
/// keyed by KID.
pub struct KeyRepository {
    store: Arc<dyn BlobStore>,
    private_cache: DashMap<String, String>,
    public_cache: DashMap<String, String>,
}

impl KeyRepository {
    /// Construct a repository over the given blob store.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            private_cache: DashMap::new(),
            public_cache: DashMap::new(),
        }
    }

    /// Ensure the private/public/metadata directory structure for
    /// `domain` exists. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn ensure_dirs(&self, domain: &str) -> AppResult<()> {
        self.store.ensure_dirs(domain).await
    }

    /// Write both PEMs for `kid`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    /// On partial failure the caller (the [`crate::rotator::Rotator`])
    /// relies on rollback to reconcile state; this call does not clean up
    /// after itself.
    pub async fn save_key_pair(
        &self,
        domain: &str,
        kid: &str,
        public_pem: &str,
        private_pem: &str,
    ) -> AppResult<()> {
        self.ensure_dirs(domain).await?;
        self.store
            .write(&private_path(domain, kid), private_pem.as_bytes(), PRIVATE_MODE)
            .await?;
        self.store
            .write(&public_path(domain, kid), public_pem.as_bytes(), PUBLIC_MODE)
            .await?;
        Ok(())
    }

    /// Read the public PEM for `kid`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::NotFound`] if absent, or
    /// [`crate::errors::ErrorKind::InvalidArgument`] if `kid` does not
    /// parse to a domain.
    pub async fn read_public_pem(&self, kid: &str) -> AppResult<String> {
        if let Some(cached) = self.public_cache.get(kid) {
            return Ok(cached.clone());
        }
        let domain = domain_of_kid(kid)?;
        let bytes = self.store.read(&public_path(&domain, kid)).await?;
        let pem = String::from_utf8_lossy(&bytes).into_owned();
        self.public_cache.insert(kid.to_owned(), pem.clone());
        Ok(pem)
    }

    /// Read the private PEM for `kid`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::NotFound`] if absent, or
    /// [`crate::errors::ErrorKind::InvalidArgument`] if `kid` does not
    /// parse to a domain.
    pub async fn read_private_pem(&self, kid: &str) -> AppResult<String> {
        if let Some(cached) = self.private_cache.get(kid) {
            return Ok(cached.clone());
        }
        let domain = domain_of_kid(kid)?;
        let bytes = self.store.read(&private_path(&domain, kid)).await?;
        let pem = String::from_utf8_lossy(&bytes).into_owned();
        self.private_cache.insert(kid.to_owned(), pem.clone());
        Ok(pem)
    }

    /// List the public KIDs stored for `domain`, in storage listing order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn list_public_kids(&self, domain: &str) -> AppResult<Vec<String>> {
        self.store.list_stems(&format!("keys/{domain}/public")).await
    }

    /// List the private KIDs stored for `domain`, in storage listing order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn list_private_kids(&self, domain: &str) -> AppResult<Vec<String>> {
        self.store.list_stems(&format!("keys/{domain}/private")).await
    }

    /// Delete the public PEM for `kid`; idempotent. Invalidates the
    /// public-PEM cache entry regardless of whether the file was present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_public(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.store.delete(&public_path(domain, kid)).await?;
        self.public_cache.remove(kid);
        Ok(())
    }

    /// Delete the private PEM for `kid`; idempotent. Invalidates the
    /// private-PEM cache entry regardless of whether the file was
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_private(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.store.delete(&private_path(domain, kid)).await?;
        self.private_cache.remove(kid);
        Ok(())
    }

    /// Drop both cache entries for `kid` without touching storage. Used
    /// by callers that need a fresh read on the next access.
    pub fn invalidate(&self, kid: &str) {
        self.private_cache.remove(kid);
        self.public_cache.remove(kid);
    }
}

#[cfg(test)]
mod tests {
    use super::KeyRepository;
    use crate::blob_store::FsBlobStore;
    use std::sync::Arc;

    fn repository() -> (KeyRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        (KeyRepository::new(store), dir)
    }

    #[tokio::test]
    async fn save_then_read_round_trips_both_pems() {
        let (repo, _dir) = repository();
        repo.save_key_pair("USER", "K1", "PUBLIC", "PRIVATE").await.unwrap();
        assert_eq!(repo.read_public_pem("K1").await.unwrap(), "PUBLIC");
        assert_eq!(repo.read_private_pem("K1").await.unwrap(), "PRIVATE");
    }

    #[tokio::test]
    async fn list_public_kids_reflects_storage() {
        let (repo, _dir) = repository();
        repo.save_key_pair("USER", "K1", "PUBLIC", "PRIVATE").await.unwrap();
        assert_eq!(repo.list_public_kids("USER").await.unwrap(), vec!["K1".to_owned()]);
    }

    #[tokio::test]
    async fn cache_survives_underlying_delete() {
        let (repo, _dir) = repository();
        repo.save_key_pair("USER", "K1", "PUBLIC", "PRIVATE").await.unwrap();
        // Prime the cache.
        repo.read_public_pem("K1").await.unwrap();
        // Delete via direct repository call so the cache is invalidated properly;
        // then re-save and confirm invalidate() forces a fresh read.
        repo.invalidate("K1");
        repo.delete_public("USER", "K1").await.unwrap();
        assert!(repo.read_public_pem("K1").await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (repo, _dir) = repository();
        repo.delete_public("USER", "NOPE").await.unwrap();
        repo.delete_private("USER", "NOPE").await.unwrap();
    }
}
