// ABOUTME: Periodic and on-demand rotation sweeps with a retry/backoff envelope
// ABOUTME: Collapses per-domain rotation outcomes into success/failed/skipped counters
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Drives [`crate::rotator::Rotator`] across every domain due for
//! rotation. This is the one component that turns a per-domain outcome
//! into a counter rather than a propagated error: an individual
//! domain's [`crate::errors::ErrorKind::IntegrityViolation`] is counted
//! as failed here rather than aborting the sweep.

use crate::errors::{AppError, AppResult};
use crate::policy_store::{LockStore, Policy, PolicyStore};
use crate::rotator::{RotationCallback, Rotator};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Outcome counts from one sweep over the due set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Domains that rotated successfully.
    pub success: u32,
    /// Domains whose rotation attempt errored.
    pub failed: u32,
    /// Domains the rotator declined to rotate (lease contention, benign
    /// rollback). Counted as retry-worthy, the same as `failed`.
    pub skipped: u32,
}

struct AcknowledgeCallback<'a> {
    policy_store: &'a dyn PolicyStore,
    policy: &'a Policy,
}

#[async_trait]
impl RotationCallback for AcknowledgeCallback<'_> {
    async fn run(&self, session: &dyn crate::policy_store::Session) -> AppResult<()> {
        self.policy_store
            .acknowledge_successful_rotation(self.policy, session)
            .await
    }
}

/// Drives rotation sweeps against the domains a [`PolicyStore`] reports
/// as due.
pub struct RotationScheduler {
    rotator: Arc<Rotator>,
    policy_store: Arc<dyn PolicyStore>,
    max_retries: u32,
    retry_interval: Duration,
}

impl RotationScheduler {
    /// Construct a scheduler. `max_retries` and `retry_interval` come
    /// from a validated [`crate::config::Settings`] snapshot.
    #[must_use]
    pub fn new(
        rotator: Arc<Rotator>,
        policy_store: Arc<dyn PolicyStore>,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            rotator,
            policy_store,
            max_retries,
            retry_interval,
        }
    }

    /// Run the periodic sweep: retry the whole due set up to
    /// `max_retries` times, sleeping `retry_interval` between attempts,
    /// stopping as soon as an attempt reports no failures and no skips.
    /// A skip (lease contention, or a rolled-back callback failure) is
    /// retry-worthy just like a failure: the due set may well rotate
    /// cleanly on the next attempt once the contending lease clears or
    /// the caller's transient condition passes.
    pub async fn run_scheduled(&self) -> SweepSummary {
        self.sweep_with_retries().await
    }

    /// Operator-triggered equivalent of [`Self::run_scheduled`].
    pub async fn trigger_immediate(&self) -> SweepSummary {
        self.sweep_with_retries().await
    }

    async fn sweep_with_retries(&self) -> SweepSummary {
        let mut last = SweepSummary::default();
        for attempt in 1..=self.max_retries {
            last = self.rotate_due_domains().await;
            if last.failed == 0 && last.skipped == 0 {
                return last;
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        last
    }

    async fn rotate_due_domains(&self) -> SweepSummary {
        let policies = match self.policy_store.get_due_for_rotation().await {
            Ok(policies) => policies,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list due policies; counting sweep as one failure");
                return SweepSummary {
                    success: 0,
                    failed: 1,
                    skipped: 0,
                };
            }
        };

        let mut summary = SweepSummary::default();
        for policy in &policies {
            match self.process_single_domain(policy).await {
                Ok(true) => summary.success += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(domain = %policy.domain, error = %e, "rotation failed for domain");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Rotate a single domain immediately, bypassing the due-set sweep.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::NotFound`] if no policy is
    /// registered for `domain`, or propagates an integrity violation from
    /// the rotator.
    pub async fn trigger_for_domain(&self, domain: &str) -> AppResult<bool> {
        let policy = self
            .policy_store
            .find_by_domain(domain)
            .await?
            .ok_or_else(|| AppError::not_found(format!("rotation policy for domain '{domain}'")))?;
        self.process_single_domain(&policy).await
    }

    /// Returns `Ok(true)` on a completed rotation, `Ok(false)` on a
    /// benign skip (lease contention or rollback).
    async fn process_single_domain(&self, policy: &Policy) -> AppResult<bool> {
        let session = self.policy_store.get_session().await?;
        let callback = AcknowledgeCallback {
            policy_store: self.policy_store.as_ref(),
            policy,
        };
        let result = self
            .rotator
            .rotate_keys(&policy.domain, &callback, session.as_ref())
            .await?;
        Ok(result.is_some())
    }
}

/// Access to the shared lease, exposed so an embedding application can
/// inspect whether a rotation is in flight for a domain without racing
/// the scheduler's own lease acquisition.
pub async fn lease_held(lock_store: &dyn LockStore, domain: &str) -> AppResult<bool> {
    let key = format!("rotation:{domain}");
    match lock_store.acquire(&key, Duration::from_secs(0)).await? {
        Some(token) => {
            lock_store.release(&key, &token).await?;
            Ok(false)
        }
        None => Ok(true),
    }
}
