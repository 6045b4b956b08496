// ABOUTME: Mints a new KID, generates a key pair, and persists pair plus metadata
// ABOUTME: Non-transactional; the Rotator wraps this in a rollback-capable envelope
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Creates brand-new key pairs. Failure at any step surfaces to the
//! caller with no partial cleanup — [`crate::rotator::Rotator`] is the
//! only caller that needs a rollback-capable envelope around generation.

use crate::crypto_provider::CryptoProvider;
use crate::domain::normalize_domain;
use crate::errors::AppResult;
use crate::key_repository::KeyRepository;
use crate::metadata::MetadataManager;
use chrono::Utc;
use std::sync::Arc;

/// Mints and persists new key pairs.
pub struct Generator {
    crypto: Arc<dyn CryptoProvider>,
    repository: Arc<KeyRepository>,
    metadata: Arc<MetadataManager>,
}

impl Generator {
    /// Construct a generator over the given collaborators.
    #[must_use]
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        repository: Arc<KeyRepository>,
        metadata: Arc<MetadataManager>,
    ) -> Self {
        Self {
            crypto,
            repository,
            metadata,
        }
    }

    /// Mint a KID for `domain`, generate a key pair, persist both PEMs
    /// and the origin metadata record, and return the new KID.
    ///
    /// # Errors
    ///
    /// Propagates any failure from minting, key generation, or storage.
    /// No cleanup is attempted on a partial failure.
    pub async fn generate(&self, domain: &str) -> AppResult<String> {
        let domain = normalize_domain(domain)?;
        let kid = self.crypto.mint_kid(&domain)?;
        self.repository.ensure_dirs(&domain).await?;
        let (public_pem, private_pem) = self.crypto.generate_key_pair()?;
        self.repository
            .save_key_pair(&domain, &kid, &public_pem, &private_pem)
            .await?;
        self.metadata.create(&domain, &kid, Utc::now()).await?;
        Ok(kid)
    }
}

#[cfg(test)]
mod tests {
    use super::Generator;
    use crate::blob_store::FsBlobStore;
    use crate::crypto_provider::{CryptoProvider, RsaCryptoProvider};
    use crate::key_repository::KeyRepository;
    use crate::metadata::MetadataManager;
    use std::sync::Arc;

    #[tokio::test]
    async fn generate_persists_keypair_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store.clone()));
        let metadata = Arc::new(MetadataManager::new(store));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());
        let generator = Generator::new(crypto, repository.clone(), metadata.clone());

        let kid = generator.generate("user").await.unwrap();
        assert!(kid.starts_with("USER-"));

        let private_pem = repository.read_private_pem(&kid).await.unwrap();
        assert!(private_pem.contains("PRIVATE KEY"));

        let record = metadata.read("USER", &kid).await.unwrap().unwrap();
        assert_eq!(record.domain, "USER");
        assert!(record.expired_at.is_none());
    }

    #[tokio::test]
    async fn successive_generates_yield_distinct_kids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store.clone()));
        let metadata = Arc::new(MetadataManager::new(store));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());
        let generator = Generator::new(crypto, repository, metadata);

        let k1 = generator.generate("user").await.unwrap();
        let k2 = generator.generate("user").await.unwrap();
        assert_ne!(k1, k2);
    }
}
