// ABOUTME: Token issuance: validates input, resolves the active key, signs, and caches
// ABOUTME: Holds a parsed-signing-key cache so repeated signs avoid re-parsing PEMs
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Builds and signs RS256 tokens for a domain's currently active key.

use crate::cache::{CacheIndex, Invalidate};
use crate::crypto_provider::{CryptoProvider, SigningKey};
use crate::domain::normalize_domain;
use crate::errors::{AppError, AppResult};
use crate::resolver::KeyResolver;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Name under which the signer registers its cache with a [`CacheIndex`].
pub const SIGNING_KEY_CACHE: &str = "signing_key";

/// Per-sign overrides for TTL and extra claims.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Overrides [`Signer`]'s configured default TTL, in seconds. Must be
    /// positive and finite if set.
    pub ttl_seconds: Option<i64>,
    /// Claims merged under the payload before `iat`/`exp` injection.
    pub additional_claims: Option<Map<String, Value>>,
}

struct ParsedKeyCache(DashMap<String, SigningKey>);

impl Invalidate for ParsedKeyCache {
    fn invalidate(&self, kid: &str) {
        self.0.remove(kid);
    }
}

/// Issues RS256 tokens for a domain's active key.
pub struct Signer {
    resolver: Arc<KeyResolver>,
    crypto: Arc<dyn CryptoProvider>,
    parsed_keys: Arc<ParsedKeyCache>,
    cache_index: Arc<CacheIndex>,
    default_ttl_seconds: i64,
    max_payload_bytes: usize,
}

impl Signer {
    /// Construct a signer. Registers its parsed-key cache with
    /// `cache_index` under [`SIGNING_KEY_CACHE`] so the janitor can
    /// invalidate it on key deletion. Retains `cache_index` to record
    /// each fill so that invalidation later finds it.
    #[must_use]
    pub fn new(
        resolver: Arc<KeyResolver>,
        crypto: Arc<dyn CryptoProvider>,
        cache_index: Arc<CacheIndex>,
        default_ttl_seconds: i64,
        max_payload_bytes: usize,
    ) -> Self {
        let parsed_keys = Arc::new(ParsedKeyCache(DashMap::new()));
        cache_index.register_cache(SIGNING_KEY_CACHE, parsed_keys.clone());
        Self {
            resolver,
            crypto,
            parsed_keys,
            cache_index,
            default_ttl_seconds,
            max_payload_bytes,
        }
    }

    /// Sign `payload` for `domain`, returning a compact RS256 JWT.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] for a bad
    /// domain, non-object payload, oversize payload, or non-positive TTL;
    /// [`crate::errors::ErrorKind::NotFound`] if `domain` has no active
    /// key; and propagates import/sign failures as
    /// [`crate::errors::ErrorKind::Fatal`].
    pub async fn sign(
        &self,
        domain: &str,
        payload: &Value,
        options: &SignOptions,
    ) -> AppResult<String> {
        let domain = normalize_domain(domain)?;
        let Value::Object(payload_obj) = payload else {
            return Err(AppError::invalid_argument("payload must be a JSON object"));
        };

        let ttl = options.ttl_seconds.unwrap_or(self.default_ttl_seconds);
        if ttl <= 0 {
            return Err(AppError::invalid_argument("ttlSeconds must be positive"));
        }

        let kid = self
            .resolver
            .active_kid(&domain)?
            .ok_or_else(|| AppError::not_found(format!("active key for domain '{domain}'")))?;

        let header = serde_json::json!({ "alg": "RS256", "typ": "JWT", "kid": kid });

        let mut merged = Map::new();
        if let Some(claims) = &options.additional_claims {
            merged.extend(claims.clone());
        }
        merged.extend(payload_obj.clone());

        let now = chrono::Utc::now().timestamp();
        merged.insert("iat".to_owned(), Value::from(now));
        let exp = merged
            .get("exp")
            .and_then(Value::as_i64)
            .unwrap_or(now + ttl);
        merged.insert("exp".to_owned(), Value::from(exp));

        let payload_value = Value::Object(merged);
        let payload_bytes = serde_json::to_vec(&payload_value)?;
        if payload_bytes.len() > self.max_payload_bytes {
            return Err(AppError::invalid_argument(format!(
                "payload of {} bytes exceeds max of {} bytes",
                payload_bytes.len(),
                self.max_payload_bytes
            )));
        }

        let header_bytes = serde_json::to_vec(&header)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_bytes),
            URL_SAFE_NO_PAD.encode(payload_bytes)
        );

        let signing_key = self.signing_key_for(&domain, &kid).await?;
        let signature = self.crypto.sign(&signing_key, signing_input.as_bytes())?;

        Ok(format!("{signing_input}.{signature}"))
    }

    async fn signing_key_for(&self, domain: &str, kid: &str) -> AppResult<SigningKey> {
        if let Some(cached) = self.parsed_keys.0.get(kid) {
            return Ok(cached.clone());
        }
        let pem = self.resolver.signing_key(domain).await?;
        let signing_key = self.crypto.import_private_key(&pem)?;
        self.parsed_keys.0.insert(kid.to_owned(), signing_key.clone());
        self.cache_index.note_fill(SIGNING_KEY_CACHE, kid);
        Ok(signing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::{SignOptions, Signer};
    use crate::active_registry::ActiveKidRegistry;
    use crate::blob_store::FsBlobStore;
    use crate::cache::CacheIndex;
    use crate::crypto_provider::{CryptoProvider, RsaCryptoProvider};
    use crate::key_repository::KeyRepository;
    use crate::resolver::KeyResolver;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::json;
    use std::sync::Arc;

    async fn harness() -> (Signer, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let registry = Arc::new(ActiveKidRegistry::new());
        let resolver = Arc::new(KeyResolver::new(registry, repository.clone()));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());

        let kid = crypto.mint_kid("USER").unwrap();
        let (public_pem, private_pem) = crypto.generate_key_pair().unwrap();
        repository.save_key_pair("USER", &kid, &public_pem, &private_pem).await.unwrap();
        resolver.set_active("USER", &kid).unwrap();

        let cache_index = Arc::new(CacheIndex::new());
        let signer = Signer::new(resolver, crypto, cache_index, 2_592_000, 4096);
        (signer, kid, dir)
    }

    #[tokio::test]
    async fn signs_with_active_kid_and_default_ttl() {
        let (signer, kid, _dir) = harness().await;
        let token = signer
            .sign("user", &json!({"sub": "u1"}), &SignOptions::default())
            .await
            .unwrap();

        let mut parts = token.split('.');
        let header_b64 = parts.next().unwrap();
        let payload_b64 = parts.next().unwrap();
        assert!(parts.next().is_some());

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).unwrap()).unwrap();
        assert_eq!(header["kid"], kid);
        assert_eq!(header["alg"], "RS256");

        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_b64).unwrap()).unwrap();
        let iat = payload["iat"].as_i64().unwrap();
        let exp = payload["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, 2_592_000);
    }

    #[tokio::test]
    async fn rejects_non_object_payload() {
        let (signer, _kid, _dir) = harness().await;
        let err = signer
            .sign("user", &json!([1, 2, 3]), &SignOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, crate::errors::ErrorKind::InvalidArgument));
    }

    #[tokio::test]
    async fn rejects_non_positive_ttl() {
        let (signer, _kid, _dir) = harness().await;
        let options = SignOptions {
            ttl_seconds: Some(0),
            additional_claims: None,
        };
        assert!(signer.sign("user", &json!({}), &options).await.is_err());
    }

    #[tokio::test]
    async fn rejects_oversize_payload() {
        let (signer, _kid, _dir) = harness().await;
        let huge = "x".repeat(5000);
        let err = signer
            .sign("user", &json!({"blob": huge}), &SignOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, crate::errors::ErrorKind::InvalidArgument));
    }

    #[tokio::test]
    async fn fails_without_active_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let registry = Arc::new(ActiveKidRegistry::new());
        let resolver = Arc::new(KeyResolver::new(registry, repository));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());
        let cache_index = Arc::new(CacheIndex::new());
        let signer = Signer::new(resolver, crypto, cache_index, 2_592_000, 4096);

        let err = signer.sign("user", &json!({}), &SignOptions::default()).await.unwrap_err();
        assert!(matches!(err.kind, crate::errors::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn iat_is_always_the_signing_time_even_if_the_caller_supplied_one() {
        let (signer, _kid, _dir) = harness().await;
        let options = SignOptions {
            ttl_seconds: None,
            additional_claims: None,
        };
        let token = signer
            .sign("user", &json!({"iat": 1}), &options)
            .await
            .unwrap();

        let payload_b64 = token.split('.').nth(1).unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_b64).unwrap()).unwrap();
        assert_ne!(payload["iat"].as_i64().unwrap(), 1);
    }

    #[tokio::test]
    async fn signing_key_cache_is_reachable_from_the_shared_cache_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let repository = Arc::new(KeyRepository::new(store));
        let registry = Arc::new(ActiveKidRegistry::new());
        let resolver = Arc::new(KeyResolver::new(registry, repository.clone()));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCryptoProvider::new());

        let kid = crypto.mint_kid("USER").unwrap();
        let (public_pem, private_pem) = crypto.generate_key_pair().unwrap();
        repository.save_key_pair("USER", &kid, &public_pem, &private_pem).await.unwrap();
        resolver.set_active("USER", &kid).unwrap();

        let cache_index = Arc::new(CacheIndex::new());
        let signer = Signer::new(resolver, crypto, cache_index.clone(), 2_592_000, 4096);

        signer.sign("user", &json!({}), &SignOptions::default()).await.unwrap();
        assert_eq!(cache_index.tracked_kids(), 1);

        cache_index.invalidate(&kid);
        assert!(signer.parsed_keys.0.get(&kid).is_none());
    }
}
