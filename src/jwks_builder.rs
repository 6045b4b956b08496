// ABOUTME: Per-domain JWKS assembly with a per-KID JWK cache
// ABOUTME: Cache eviction is delegated to the janitor via the shared CacheIndex
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Assembles the `{ "keys": [...] }` JWKS document for a domain from the
//! public PEMs on disk, reusing cached JWK conversions across calls.

use crate::cache::{CacheIndex, Invalidate};
use crate::crypto_provider::{CryptoProvider, JsonWebKey, JsonWebKeySet};
use crate::errors::AppResult;
use crate::key_repository::KeyRepository;
use dashmap::DashMap;
use std::sync::Arc;

/// Name under which the builder registers its cache with a [`CacheIndex`].
pub const JWK_CACHE: &str = "jwk";

struct JwkCache(DashMap<String, JsonWebKey>);

impl Invalidate for JwkCache {
    fn invalidate(&self, kid: &str) {
        self.0.remove(kid);
    }
}

/// Builds JWKS documents for a domain.
pub struct JwksBuilder {
    repository: Arc<KeyRepository>,
    crypto: Arc<dyn CryptoProvider>,
    jwks: Arc<JwkCache>,
    cache_index: Arc<CacheIndex>,
}

impl JwksBuilder {
    /// Construct a builder. Registers its JWK cache with `cache_index`
    /// under [`JWK_CACHE`] so the janitor can invalidate it on key
    /// deletion. Retains `cache_index` to record each fill so that
    /// invalidation later finds it.
    #[must_use]
    pub fn new(
        repository: Arc<KeyRepository>,
        crypto: Arc<dyn CryptoProvider>,
        cache_index: Arc<CacheIndex>,
    ) -> Self {
        let jwks = Arc::new(JwkCache(DashMap::new()));
        cache_index.register_cache(JWK_CACHE, jwks.clone());
        Self {
            repository,
            crypto,
            jwks,
            cache_index,
        }
    }

    /// Build the JWKS document for `domain`. KID ordering matches the
    /// repository's directory listing order for the current filesystem
    /// state; two successive calls against the same state yield the same
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates storage or crypto conversion failures.
    pub async fn get_jwks(&self, domain: &str) -> AppResult<JsonWebKeySet> {
        let kids = self.repository.list_public_kids(domain).await?;
        let mut keys = Vec::with_capacity(kids.len());
        for kid in kids {
            keys.push(self.jwk_for(&kid).await?);
        }
        Ok(JsonWebKeySet { keys })
    }

    async fn jwk_for(&self, kid: &str) -> AppResult<JsonWebKey> {
        if let Some(cached) = self.jwks.0.get(kid) {
            return Ok(cached.clone());
        }
        let pem = self.repository.read_public_pem(kid).await?;
        let jwk = self.crypto.pem_to_jwk(&pem, kid)?;
        self.jwks.0.insert(kid.to_owned(), jwk.clone());
        self.cache_index.note_fill(JWK_CACHE, kid);
        Ok(jwk)
    }
}

#[cfg(test)]
mod tests {
    use super::JwksBuilder;
    use crate::blob_store::FsBlobStore;
    use crate::cache::CacheIndex;
    use crate::crypto_provider::{CryptoProvider, RsaCryptoProvider};
    use crate::key_repository::KeyRepository;
    use std::sync::Arc;

    #[tokio::test]
    async fn builds_jwks_for_every_public_kid() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());

        let kid = crypto.mint_kid("USER").unwrap();
        let (public_pem, private_pem) = crypto.generate_key_pair().unwrap();
        repository.save_key_pair("USER", &kid, &public_pem, &private_pem).await.unwrap();

        let cache_index = Arc::new(CacheIndex::new());
        let builder = JwksBuilder::new(repository, crypto, cache_index);
        let jwks = builder.get_jwks("USER").await.unwrap();

        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, kid);
        assert_eq!(jwks.keys[0].alg, "RS256");
    }

    #[tokio::test]
    async fn empty_domain_yields_empty_keyset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());
        let cache_index = Arc::new(CacheIndex::new());
        let builder = JwksBuilder::new(repository, crypto, cache_index);

        let jwks = builder.get_jwks("NOBODY").await.unwrap();
        assert!(jwks.keys.is_empty());
    }

    #[tokio::test]
    async fn jwk_cache_is_reachable_from_the_shared_cache_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());

        let kid = crypto.mint_kid("USER").unwrap();
        let (public_pem, private_pem) = crypto.generate_key_pair().unwrap();
        repository.save_key_pair("USER", &kid, &public_pem, &private_pem).await.unwrap();

        let cache_index = Arc::new(CacheIndex::new());
        let builder = JwksBuilder::new(repository, crypto, cache_index.clone());

        builder.get_jwks("USER").await.unwrap();
        assert_eq!(cache_index.tracked_kids(), 1);

        cache_index.invalidate(&kid);
        assert!(builder.jwks.0.get(&kid).is_none());
    }
}
