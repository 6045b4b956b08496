// ABOUTME: RSA primitives, KID minting/parsing, and PEM/JWK conversion
// ABOUTME: Defines the CryptoProvider contract and a reference RSA implementation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The cryptographic primitives the rest of the crate consumes through a
//! trait, so that an HSM-backed or otherwise non-extractable signing
//! handle can stand in for [`RsaCryptoProvider`] without touching any
//! other module.

use crate::domain::{normalize_domain, parse_kid, ParsedKid};
use crate::errors::{AppError, AppResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use rsa::{
    pkcs1::DecodeRsaPublicKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// RSA modulus size used for every generated key pair.
pub const RSA_KEY_BITS: usize = 4096;

/// A JSON Web Key, the public verification surface for one KID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonWebKey {
    /// Key type, always `"RSA"`.
    pub kty: String,
    /// Public key use, always `"sig"`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key identifier.
    pub kid: String,
    /// Algorithm, always `"RS256"`.
    pub alg: String,
    /// RSA modulus, base64url encoded.
    pub n: String,
    /// RSA public exponent, base64url encoded.
    pub e: String,
}

/// A JSON Web Key Set: the full public verification surface for a domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// The domain's public keys, in listing order.
    pub keys: Vec<JsonWebKey>,
}

/// An opaque, non-extractable signing handle bound to RS256.
#[derive(Clone)]
pub struct SigningKey(Arc<RsaPrivateKey>);

/// RSA keypair generation, PEM/JWK conversion, signing, and KID handling.
///
/// Implementations are expected to be cheap to clone (or already wrapped
/// in `Arc`) and safe to share across threads.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh RSA key pair, returning `(public_pem, private_pem)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Fatal`] if key generation fails.
    fn generate_key_pair(&self) -> AppResult<(String, String)>;

    /// Parse a PKCS#8 PEM private key into an opaque signing handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Fatal`] if the PEM does not parse.
    fn import_private_key(&self, pem: &str) -> AppResult<SigningKey>;

    /// Sign `bytes` with `signing_key`, returning the base64url (no
    /// padding) encoding of the raw RSASSA-PKCS1-v1_5/SHA-256 signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Fatal`] if signing fails.
    fn sign(&self, signing_key: &SigningKey, bytes: &[u8]) -> AppResult<String>;

    /// Convert a public key PEM into a JWK for the given KID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Fatal`] if the PEM does not parse.
    fn pem_to_jwk(&self, public_pem: &str, kid: &str) -> AppResult<JsonWebKey>;

    /// Mint a fresh KID of the form `DOMAIN-YYYYMMDD-HHMMSS-HEX8`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `domain`
    /// does not normalize.
    fn mint_kid(&self, domain: &str) -> AppResult<String>;

    /// Parse a KID back into its domain/date/time/nonce components.
    fn parse_kid(&self, kid: &str) -> Option<ParsedKid>;

    /// SHA-256 over a canonicalized JSON serialization (sorted keys, no
    /// insignificant whitespace), hex encoded.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `value`
    /// cannot be serialized.
    fn canonical_hash(&self, value: &serde_json::Value) -> AppResult<String>;
}

/// Reference [`CryptoProvider`] backed by the `rsa` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaCryptoProvider;

impl RsaCryptoProvider {
    /// Create a new provider. Stateless; cheap to construct repeatedly.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CryptoProvider for RsaCryptoProvider {
    fn generate_key_pair(&self) -> AppResult<(String, String)> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AppError::fatal(format!("RSA key generation failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| AppError::fatal(format!("PKCS#8 PEM encode failed: {e}")))?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| AppError::fatal(format!("SPKI PEM encode failed: {e}")))?;

        Ok((public_pem, private_pem))
    }

    fn import_private_key(&self, pem: &str) -> AppResult<SigningKey> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)?;
        Ok(SigningKey(Arc::new(key)))
    }

    fn sign(&self, signing_key: &SigningKey, bytes: &[u8]) -> AppResult<String> {
        let digest = Sha256::digest(bytes);
        let scheme = Pkcs1v15Sign::new::<Sha256>();
        let signature = signing_key
            .0
            .sign(scheme, &digest)
            .map_err(|e| AppError::fatal(format!("RSA signing failed: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(signature))
    }

    fn pem_to_jwk(&self, public_pem: &str, kid: &str) -> AppResult<JsonWebKey> {
        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_pem))
            .map_err(|e| AppError::fatal(format!("public key PEM parse failed: {e}")))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        Ok(JsonWebKey {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            kid: kid.to_owned(),
            alg: "RS256".to_owned(),
            n,
            e,
        })
    }

    fn mint_kid(&self, domain: &str) -> AppResult<String> {
        let normalized = normalize_domain(domain)?;
        let now = Utc::now();
        let mut nonce = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Ok(format!(
            "{normalized}-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            hex::encode_upper(nonce)
        ))
    }

    fn parse_kid(&self, kid: &str) -> Option<ParsedKid> {
        parse_kid(kid)
    }

    fn canonical_hash(&self, value: &serde_json::Value) -> AppResult<String> {
        let canonical = canonicalize(value);
        let serialized = serde_json::to_vec(&canonical)?;
        Ok(hex::encode(Sha256::digest(&serialized)))
    }
}

/// Recursively sort object keys so two semantically equal values always
/// serialize to the same byte string.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut obj = serde_json::Map::new();
            for (k, v) in sorted {
                obj.insert(k, v);
            }
            serde_json::Value::Object(obj)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
