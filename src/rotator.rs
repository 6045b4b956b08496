// ABOUTME: The two-phase prepare/commit/rollback rotation state machine
// ABOUTME: Serialized per domain by a distributed lease, bracketing an external DB transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Rotates a domain's active key. A rotation either completes fully —
//! new key generated, database callback applied, previous key retired —
//! or leaves the system indistinguishable from its pre-rotation state.
//! No file deletion for the previous key happens until the active
//! pointer has flipped, so a signer racing the rotation always sees a
//! complete key, never a dangling one.

use crate::domain::normalize_domain;
use crate::errors::{AppError, AppResult};
use crate::generator::Generator;
use crate::janitor::Janitor;
use crate::policy_store::{LockStore, Session};
use crate::resolver::KeyResolver;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Lease TTL for a single rotation. The lock store must expire stale
/// leases so a crashed rotator does not deadlock a domain.
pub const LEASE_TTL: Duration = Duration::from_secs(300);

/// A callback the caller supplies to record its own bookkeeping as part
/// of the rotation's database transaction.
#[async_trait]
pub trait RotationCallback: Send + Sync {
    /// Perform the caller's own transactional work for this rotation.
    ///
    /// # Errors
    ///
    /// Any error triggers rollback of the rotation.
    async fn run(&self, session: &dyn Session) -> AppResult<()>;
}

/// The per-domain prepare/commit/rollback state machine.
pub struct Rotator {
    generator: Arc<Generator>,
    janitor: Arc<Janitor>,
    resolver: Arc<KeyResolver>,
    lock_store: Arc<dyn LockStore>,
}

impl Rotator {
    /// Construct a rotator over the given collaborators.
    #[must_use]
    pub fn new(
        generator: Arc<Generator>,
        janitor: Arc<Janitor>,
        resolver: Arc<KeyResolver>,
        lock_store: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            generator,
            janitor,
            resolver,
            lock_store,
        }
    }

    /// Rotate `domain`'s active key.
    ///
    /// Returns the new active KID on success, `None` on a benign failure
    /// (lock contention, a controlled rollback), and an error for
    /// programmer errors or invariant violations.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::InvalidArgument`] if `domain`
    /// does not normalize, or [`crate::errors::ErrorKind::IntegrityViolation`]
    /// if an invariant the rotator relies on does not hold (most notably:
    /// no active KID exists for a domain undergoing rotation, or rollback
    /// cannot find a still-active KID to return to).
    pub async fn rotate_keys(
        &self,
        domain: &str,
        callback: &dyn RotationCallback,
        session: &dyn Session,
    ) -> AppResult<Option<String>> {
        let domain = normalize_domain(domain)?;
        let lease_key = format!("rotation:{domain}");

        let Some(token) = self.lock_store.acquire(&lease_key, LEASE_TTL).await? else {
            return Ok(None);
        };

        let result = self.rotate_under_lease(&domain, callback, session).await;

        session.end_session().await;
        let _ = self.lock_store.release(&lease_key, &token).await;

        result
    }

    async fn rotate_under_lease(
        &self,
        domain: &str,
        callback: &dyn RotationCallback,
        session: &dyn Session,
    ) -> AppResult<Option<String>> {
        let mut state = RotationState::default();

        let prepare_result = self.prepare(domain, &mut state).await;
        if let Err(e) = prepare_result {
            self.rollback(domain, &mut state).await?;
            return Self::to_benign_or_propagate(e);
        }

        session.start_transaction().await?;

        let txn_result = async {
            callback.run(session).await?;
            self.commit(domain, &mut state).await
        }
        .await;

        match txn_result {
            Ok(new_active) => {
                session.commit_transaction().await?;
                Ok(Some(new_active))
            }
            Err(e) => {
                self.rollback(domain, &mut state).await?;
                session.abort_transaction().await?;
                Self::to_benign_or_propagate(e)
            }
        }
    }

    fn to_benign_or_propagate(e: AppError) -> AppResult<Option<String>> {
        if e.is_integrity_violation() {
            Err(e)
        } else {
            Ok(None)
        }
    }

    /// Generate the upcoming key and archive the current active key's
    /// metadata. The origin metadata for the outgoing key still exists
    /// at this point; only `commit` deletes it.
    async fn prepare(&self, domain: &str, state: &mut RotationState) -> AppResult<()> {
        let upcoming_kid = self.generator.generate(domain).await?;

        let current_active = self.resolver.active_kid(domain)?.ok_or_else(|| {
            AppError::integrity_violation(format!(
                "rotation requires an existing active key for domain '{domain}'"
            ))
        })?;

        self.janitor.add_key_expiry(domain, &current_active).await?;

        state.upcoming_kid = Some(upcoming_kid);
        Ok(())
    }

    /// Flip the active pointer, then retire the previous key: delete its
    /// private PEM (it can no longer sign) and its origin metadata (the
    /// archive entry written in `prepare` is now the sole record).
    async fn commit(&self, domain: &str, state: &mut RotationState) -> AppResult<String> {
        let upcoming_kid = state.upcoming_kid.clone().ok_or_else(|| {
            AppError::integrity_violation("commit called without a prepared upcoming key")
        })?;

        let previous_kid = self.resolver.active_kid(domain)?.ok_or_else(|| {
            AppError::integrity_violation(format!(
                "rotation requires an existing active key for domain '{domain}'"
            ))
        })?;

        self.resolver.set_active(domain, &upcoming_kid)?;
        self.janitor.delete_private(domain, &previous_kid).await?;
        self.janitor.delete_origin_metadata(domain, &previous_kid).await?;

        Ok(upcoming_kid)
    }

    /// Undo `prepare` (and, if reached, the pointer flip from `commit`),
    /// leaving the system indistinguishable from its pre-rotation state.
    /// Best-effort: every step is idempotent and failures are logged
    /// rather than propagated, except the final invariant check.
    async fn rollback(&self, domain: &str, state: &mut RotationState) -> AppResult<()> {
        if let Some(upcoming_kid) = state.upcoming_kid.take() {
            if let Err(e) = self.janitor.delete_private(domain, &upcoming_kid).await {
                tracing::warn!(kid = %upcoming_kid, error = %e, "rollback: failed to delete upcoming private key");
            }
            if let Err(e) = self.janitor.delete_public(domain, &upcoming_kid).await {
                tracing::warn!(kid = %upcoming_kid, error = %e, "rollback: failed to delete upcoming public key");
            }
            if let Err(e) = self.janitor.delete_origin_metadata(domain, &upcoming_kid).await {
                tracing::warn!(kid = %upcoming_kid, error = %e, "rollback: failed to delete upcoming origin metadata");
            }
        }

        let active_kid = self.resolver.active_kid(domain)?.ok_or_else(|| {
            AppError::integrity_violation(format!(
                "no active kid for domain '{domain}' after rollback"
            ))
        })?;

        if let Err(e) = self.janitor.delete_archived_metadata(&active_kid).await {
            tracing::warn!(kid = %active_kid, error = %e, "rollback: failed to remove archive metadata for the still-active key");
        }

        Ok(())
    }
}

#[derive(Default)]
struct RotationState {
    upcoming_kid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::RotationCallback;
    use crate::errors::{AppError, AppResult};
    use crate::policy_store::{InMemorySession, LockStore, Session};
    use crate::test_support::FullStack;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopCallback;

    #[async_trait]
    impl RotationCallback for NoopCallback {
        async fn run(&self, _session: &dyn Session) -> AppResult<()> {
            Ok(())
        }
    }

    struct FailingCallback;

    #[async_trait]
    impl RotationCallback for FailingCallback {
        async fn run(&self, _session: &dyn Session) -> AppResult<()> {
            Err(AppError::transient("simulated callback failure"))
        }
    }

    #[tokio::test]
    async fn happy_rotation_flips_active_and_retires_previous() {
        let (h, k1) = FullStack::with_active_domain("USER").await;
        let session = InMemorySession::default();

        let result = h.rotator.rotate_keys("USER", &NoopCallback, &session).await.unwrap();
        let k2 = result.unwrap();
        assert_ne!(k2, k1);

        assert_eq!(h.resolver.active_kid("USER").unwrap().as_deref(), Some(k2.as_str()));
        assert!(h.repository.read_private_pem(&k1).await.is_err());
        assert!(h.repository.read_public_pem(&k1).await.is_ok());

        let archived = h.metadata.read("USER", &k1).await.unwrap().unwrap();
        assert!(archived.expired_at.is_some());

        assert_eq!(*session.calls.lock().unwrap(), vec!["start", "commit", "end"]);
    }

    #[tokio::test]
    async fn callback_failure_rolls_back_to_pre_rotation_state() {
        let (h, k1) = FullStack::with_active_domain("USER").await;
        let session = InMemorySession::default();

        let result = h.rotator.rotate_keys("USER", &FailingCallback, &session).await.unwrap();
        assert!(result.is_none());

        assert_eq!(h.resolver.active_kid("USER").unwrap().as_deref(), Some(k1.as_str()));
        assert!(h.metadata.read("USER", &k1).await.unwrap().unwrap().expired_at.is_none());

        assert_eq!(*session.calls.lock().unwrap(), vec!["start", "abort", "end"]);
    }

    #[tokio::test]
    async fn lease_contention_yields_none_with_no_side_effects() {
        let (h, k1) = FullStack::with_active_domain("USER").await;
        let held_token = h.lock_store.acquire("rotation:USER", Duration::from_secs(300)).await.unwrap().unwrap();
        let session = InMemorySession::default();

        let result = h.rotator.rotate_keys("USER", &NoopCallback, &session).await.unwrap();
        assert!(result.is_none());
        assert_eq!(h.resolver.active_kid("USER").unwrap().as_deref(), Some(k1.as_str()));
        assert!(session.calls.lock().unwrap().is_empty());

        h.lock_store.release("rotation:USER", &held_token).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_rotations_yield_exactly_one_winner() {
        let (h, _k1) = FullStack::with_active_domain("USER").await;
        let rotator = h.rotator.clone();
        let session_a = InMemorySession::default();
        let session_b = InMemorySession::default();

        let (a, b) = tokio::join!(
            rotator.rotate_keys("USER", &NoopCallback, &session_a),
            rotator.rotate_keys("USER", &NoopCallback, &session_b),
        );

        let results = [a.unwrap(), b.unwrap()];
        let successes = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(successes, 1);
    }
}
