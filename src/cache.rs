// ABOUTME: Per-KID cache coherence across the PEM, signing-key, and JWK caches
// ABOUTME: Replaces ad hoc invalidation scattered across call sites with one index
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! A small registry recording, for each KID, which named caches currently
//! hold an entry for it. Components register an interest when they fill a
//! cache slot; [`CacheIndex::invalidate`] removes the KID from every cache
//! that reported holding it, in one call, rather than each collaborator
//! independently trying to remember every cache that might be stale.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// A cache that can drop a single key, addressed by KID.
pub trait Invalidate: Send + Sync {
    /// Remove the entry for `kid`, if present.
    fn invalidate(&self, kid: &str);
}

/// Tracks which named caches hold an entry for each KID.
#[derive(Default)]
pub struct CacheIndex {
    holders: DashMap<String, HashSet<&'static str>>,
    caches: DashMap<&'static str, Arc<dyn Invalidate>>,
}

impl CacheIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache under a stable name so [`Self::invalidate`] can
    /// reach it later. Re-registering the same name replaces the handle.
    pub fn register_cache(&self, name: &'static str, cache: Arc<dyn Invalidate>) {
        self.caches.insert(name, cache);
    }

    /// Record that `name` now holds an entry for `kid`.
    pub fn note_fill(&self, name: &'static str, kid: &str) {
        self.holders.entry(kid.to_owned()).or_default().insert(name);
    }

    /// Invalidate `kid` in every cache that reported holding it, and in
    /// any additional caches named explicitly (for callers that always
    /// want a cache cleared regardless of whether a fill was recorded).
    pub fn invalidate(&self, kid: &str) {
        if let Some((_, names)) = self.holders.remove(kid) {
            for name in names {
                if let Some(cache) = self.caches.get(name) {
                    cache.invalidate(kid);
                }
            }
        }
    }

    /// Number of KIDs with at least one recorded cache entry. Exposed for
    /// tests and diagnostics.
    #[must_use]
    pub fn tracked_kids(&self) -> usize {
        self.holders.len()
    }
}
