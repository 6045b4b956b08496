// ABOUTME: Shared full-stack test fixture assembling every collaborator over a temp directory
// ABOUTME: Used by the rotator and scheduler unit test modules to avoid repeating the wiring
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Wiring a rotation-capable stack by hand in every test module got
//! repetitive fast; this assembles one and hands back `Arc`s so tests
//! can poke at any layer directly.

use crate::active_registry::ActiveKidRegistry;
use crate::blob_store::FsBlobStore;
use crate::cache::CacheIndex;
use crate::crypto_provider::{CryptoProvider, RsaCryptoProvider};
use crate::generator::Generator;
use crate::janitor::Janitor;
use crate::key_repository::KeyRepository;
use crate::metadata::MetadataManager;
use crate::policy_store::InMemoryLockStore;
use crate::resolver::KeyResolver;
use crate::rotator::Rotator;
use std::sync::Arc;

const DEFAULT_GRACE_PERIOD_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Every collaborator needed to exercise a [`Rotator`], backed by a
/// [`tempfile::TempDir`] that is deleted when this value drops.
pub(crate) struct FullStack {
    pub(crate) repository: Arc<KeyRepository>,
    pub(crate) metadata: Arc<MetadataManager>,
    pub(crate) resolver: Arc<KeyResolver>,
    pub(crate) generator: Arc<Generator>,
    pub(crate) janitor: Arc<Janitor>,
    pub(crate) lock_store: Arc<InMemoryLockStore>,
    pub(crate) rotator: Arc<Rotator>,
    _dir: tempfile::TempDir,
}

impl FullStack {
    /// Build a fresh stack with no keys and no active domains.
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store.clone()));
        let metadata = Arc::new(MetadataManager::new(store));
        let registry = Arc::new(ActiveKidRegistry::new());
        let resolver = Arc::new(KeyResolver::new(registry, repository.clone()));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());
        let cache_index = Arc::new(CacheIndex::new());

        let generator = Arc::new(Generator::new(crypto.clone(), repository.clone(), metadata.clone()));
        let janitor = Arc::new(Janitor::new(
            repository.clone(),
            metadata.clone(),
            cache_index,
            DEFAULT_GRACE_PERIOD_MS,
        ));
        let lock_store = Arc::new(InMemoryLockStore::default());

        let rotator = Arc::new(Rotator::new(generator.clone(), janitor.clone(), resolver.clone(), lock_store.clone()));

        Self {
            repository,
            metadata,
            resolver,
            generator,
            janitor,
            lock_store,
            rotator,
            _dir: dir,
        }
    }

    /// Build a stack with one already-generated, already-active key for
    /// `domain`. Returns the stack and that key's KID.
    pub(crate) async fn with_active_domain(domain: &str) -> (Self, String) {
        let stack = Self::new();
        let kid = stack.generator.generate(domain).await.expect("generate");
        stack.resolver.set_active(domain, &kid).expect("set_active");
        (stack, kid)
    }
}
