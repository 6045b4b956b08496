// ABOUTME: External collaborator interfaces for rotation policy, locking, and transactions
// ABOUTME: Production backends are supplied by the caller; only in-memory test doubles live here
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The rotation scheduler and rotator depend on three narrow capability
//! interfaces rather than a concrete database client: a [`PolicyStore`]
//! for which domains are due, a [`LockStore`] for the per-domain rotation
//! lease, and a [`Session`] bracketing the caller's own transactional
//! work. A production backend (Postgres, etcd, …) is outside this
//! crate's scope; [`InMemoryPolicyStore`] and [`InMemoryLockStore`] exist
//! only as test doubles.

use crate::errors::AppResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A domain's rotation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// The normalized domain this policy governs.
    pub domain: String,
    /// How often the domain's key should be rotated.
    pub rotation_interval: Duration,
}

/// An externally supplied transaction context bracketing the rotation's
/// own database work.
#[async_trait]
pub trait Session: Send + Sync {
    /// Begin the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] if the backend is
    /// unreachable.
    async fn start_transaction(&self) -> AppResult<()>;

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] if the commit
    /// fails.
    async fn commit_transaction(&self) -> AppResult<()>;

    /// Abort the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] if the abort
    /// fails.
    async fn abort_transaction(&self) -> AppResult<()>;

    /// Release any resources held by the session.
    async fn end_session(&self);
}

/// Which domains are due for rotation, and acknowledgment of completed
/// rotations.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every policy currently due for rotation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend failure.
    async fn get_due_for_rotation(&self) -> AppResult<Vec<Policy>>;

    /// The policy for `domain`, if one is registered.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend failure.
    async fn find_by_domain(&self, domain: &str) -> AppResult<Option<Policy>>;

    /// Open a new transaction session bracketing the caller's own
    /// bookkeeping for a rotation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend failure.
    async fn get_session(&self) -> AppResult<Box<dyn Session>>;

    /// Record that `policy`'s rotation completed successfully, as part of
    /// the caller's own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend failure.
    async fn acknowledge_successful_rotation(
        &self,
        policy: &Policy,
        session: &dyn Session,
    ) -> AppResult<()>;
}

/// A distributed mutual-exclusion lock over `rotation:<domain>`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire the lock for `key`, returning an opaque token on success
    /// or `None` if already held.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend
    /// failure.
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<Option<String>>;

    /// Release the lock for `key` iff `token` still holds it. Returns
    /// `true` if the release happened.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on backend
    /// failure.
    async fn release(&self, key: &str, token: &str) -> AppResult<bool>;
}

/// In-memory [`Session`] test double: records calls, always succeeds.
#[derive(Default)]
pub struct InMemorySession {
    /// Call log, in order, for assertions.
    pub calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Session for InMemorySession {
    async fn start_transaction(&self) -> AppResult<()> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push("start");
        Ok(())
    }

    async fn commit_transaction(&self) -> AppResult<()> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push("commit");
        Ok(())
    }

    async fn abort_transaction(&self) -> AppResult<()> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push("abort");
        Ok(())
    }

    async fn end_session(&self) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push("end");
    }
}

/// In-memory [`LockStore`] test double with TTL-based expiry.
#[derive(Default)]
pub struct InMemoryLockStore {
    leases: DashMap<String, (String, Instant)>,
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<Option<String>> {
        let now = Instant::now();
        if let Some(existing) = self.leases.get(key) {
            if existing.1 > now {
                return Ok(None);
            }
        }
        let token = uuid_like_token();
        self.leases.insert(key.to_owned(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> AppResult<bool> {
        if let Some(entry) = self.leases.get(key) {
            if entry.0 == token {
                drop(entry);
                self.leases.remove(key);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn uuid_like_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// In-memory [`PolicyStore`] test double.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: Mutex<HashMap<String, Policy>>,
}

impl InMemoryPolicyStore {
    /// Construct a store seeded with `policies`.
    #[must_use]
    pub fn new(policies: Vec<Policy>) -> Self {
        let map = policies.into_iter().map(|p| (p.domain.clone(), p)).collect();
        Self {
            policies: Mutex::new(map),
        }
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_due_for_rotation(&self) -> AppResult<Vec<Policy>> {
        Ok(self
            .policies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn find_by_domain(&self, domain: &str) -> AppResult<Option<Policy>> {
        Ok(self
            .policies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(domain)
            .cloned())
    }

    async fn get_session(&self) -> AppResult<Box<dyn Session>> {
        Ok(Box::new(InMemorySession::default()))
    }

    async fn acknowledge_successful_rotation(
        &self,
        _policy: &Policy,
        _session: &dyn Session,
    ) -> AppResult<()> {
        Ok(())
    }
}
