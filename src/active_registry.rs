// ABOUTME: The single active signing KID per domain
// ABOUTME: Process-local by default; mutations are always serialized by the rotation lease
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! A per-domain single-valued register. The core requires only
//! compare-and-set-free, last-writer-wins semantics, because every
//! mutation happens under a rotation lease ([`crate::rotator::Rotator`])
//! that already guarantees a single writer per domain.

use dashmap::DashMap;

/// The current active KID per domain, process-local by default.
#[derive(Default)]
pub struct ActiveKidRegistry {
    active: DashMap<String, String>,
}

impl ActiveKidRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the active KID for `domain`, if one is set.
    #[must_use]
    pub fn get_active(&self, domain: &str) -> Option<String> {
        self.active.get(domain).map(|v| v.clone())
    }

    /// Set the active KID for `domain`. No validation that the KID
    /// exists; the [`crate::rotator::Rotator`] guarantees the
    /// precondition. Returns the KID that was set.
    pub fn set_active(&self, domain: &str, kid: &str) -> String {
        self.active.insert(domain.to_owned(), kid.to_owned());
        kid.to_owned()
    }

    /// Clear the active KID for `domain`, if any.
    pub fn clear_active(&self, domain: &str) {
        self.active.remove(domain);
    }

    /// Clear every domain's active KID.
    pub fn clear_all(&self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::ActiveKidRegistry;

    #[test]
    fn set_then_get_round_trips() {
        let registry = ActiveKidRegistry::new();
        assert!(registry.get_active("USER").is_none());
        registry.set_active("USER", "K1");
        assert_eq!(registry.get_active("USER").as_deref(), Some("K1"));
    }

    #[test]
    fn last_writer_wins() {
        let registry = ActiveKidRegistry::new();
        registry.set_active("USER", "K1");
        registry.set_active("USER", "K2");
        assert_eq!(registry.get_active("USER").as_deref(), Some("K2"));
    }

    #[test]
    fn clear_active_only_affects_one_domain() {
        let registry = ActiveKidRegistry::new();
        registry.set_active("USER", "K1");
        registry.set_active("TEAM", "K2");
        registry.clear_active("USER");
        assert!(registry.get_active("USER").is_none());
        assert_eq!(registry.get_active("TEAM").as_deref(), Some("K2"));
    }

    #[test]
    fn clear_all_wipes_every_domain() {
        let registry = ActiveKidRegistry::new();
        registry.set_active("USER", "K1");
        registry.set_active("TEAM", "K2");
        registry.clear_all();
        assert!(registry.get_active("USER").is_none());
        assert!(registry.get_active("TEAM").is_none());
    }
}
