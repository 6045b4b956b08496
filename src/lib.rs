// ABOUTME: Main library entry point for the signing-key lifecycle service
// ABOUTME: Generates, rotates, and publishes per-domain RSA keys backing JWT issuance
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![deny(unsafe_code)]

//! # KeyForge
//!
//! A per-tenant asymmetric signing-key lifecycle service. It generates,
//! stores, rotates, retires, and publishes RSA key pairs that back token
//! signing (JWT) and public-key discovery (JWKS) for multiple isolated
//! domains (logical tenants/audiences). For each domain exactly one
//! signing key is active at a time; historical public keys remain
//! verifiable until a post-rotation grace period expires, after which
//! they are reaped.
//!
//! ## Architecture
//!
//! The crate is organized as a dependency-ordered stack of narrow
//! collaborators:
//!
//! - [`crypto_provider`] / [`blob_store`] — external interfaces (RSA
//!   primitives, namespaced byte storage) with reference implementations.
//! - [`metadata`] — per-KID origin and archive metadata records.
//! - [`key_repository`] — PEM storage plus a layered read cache.
//! - [`active_registry`] — the single active KID per domain.
//! - [`resolver`] — a thin facade over the registry and repository.
//! - [`signer`] / [`jwks_builder`] — token issuance and JWKS assembly.
//! - [`janitor`] / [`generator`] — cleanup and creation of key material.
//! - [`rotator`] — the two-phase prepare/commit/rollback state machine.
//! - [`scheduler`] — the retrying, policy-driven rotation sweep.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyforge::config::Settings;
//! use keyforge::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let settings = Settings::from_env();
//!     keyforge::logging::LoggingConfig::from_env().init()?;
//!     tracing::info!(?settings, "keyforge configured");
//!     Ok(())
//! }
//! ```

/// The single active signing KID per domain.
pub mod active_registry;

/// Per-KID cache coherence (`CacheIndex`).
pub mod cache;

/// Namespaced byte storage (`BlobStore`) with a filesystem reference implementation.
pub mod blob_store;

/// Typed runtime configuration and the `ConfigUpdater` capability.
pub mod config;

/// RSA primitives, KID minting, and JWK conversion (`CryptoProvider`).
pub mod crypto_provider;

/// Domain normalization and KID parsing.
pub mod domain;

/// Unified error handling system with a kind-tagged `AppError`.
pub mod errors;

/// Deterministic cleanup: artifact deletion and the expired-key reaper.
pub mod janitor;

/// Mints new key pairs and persists them.
pub mod generator;

/// Per-domain JWKS assembly with a per-KID JWK cache.
pub mod jwks_builder;

/// Per-KID origin and archive metadata records.
pub mod metadata;

/// Production logging and structured output.
pub mod logging;

/// Canonical storage of PEM artifacts with a layered read cache.
pub mod key_repository;

/// External collaborator interfaces: policy store, lock store, session.
pub mod policy_store;

/// Thin facade from domain to active KID to signing material.
pub mod resolver;

/// The two-phase prepare/commit/rollback rotation state machine.
pub mod rotator;

/// The retrying, policy-driven rotation sweep.
pub mod scheduler;

/// Token issuance: builds, signs, and caches parsed signing keys.
pub mod signer;

#[cfg(test)]
pub(crate) mod test_support;
