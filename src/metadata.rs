// ABOUTME: Per-KID origin and archive metadata records
// ABOUTME: Origin metadata is written at creation; archive metadata at retirement
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Metadata records are small JSON documents keyed by KID. Origin records
//! live under the domain directory and are written at key creation;
//! archive records live in a domain-flat directory and are written when a
//! key is retired, carrying a non-null `expired_at`.

use crate::blob_store::BlobStore;
use crate::errors::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A metadata record for one KID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyMetadata {
    /// The key identifier this record describes.
    pub kid: String,
    /// The normalized domain the key belongs to.
    pub domain: String,
    /// When the key was created, RFC 3339 UTC.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// When the key expires (is eligible for reaping), RFC 3339 UTC, or
    /// `None` while the key is still active.
    #[serde(rename = "expiredAt")]
    pub expired_at: Option<DateTime<Utc>>,
}

fn origin_path(domain: &str, kid: &str) -> String {
    format!("metadata/keys/{domain}/{kid}.meta")
}

fn archive_path(kid: &str) -> String {
    format!("metadata/keys/archived/{kid}.meta")
}

/// Reads and writes origin and archive metadata records.
pub struct MetadataManager {
    store: Arc<dyn BlobStore>,
}

impl MetadataManager {
    /// Construct a manager over the given blob store.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Write the origin record for `kid`, iff not already present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn create(&self, domain: &str, kid: &str, created_at: DateTime<Utc>) -> AppResult<()> {
        let path = origin_path(domain, kid);
        if self.store.exists(&path).await {
            return Ok(());
        }
        let record = KeyMetadata {
            kid: kid.to_owned(),
            domain: domain.to_owned(),
            created_at,
            expired_at: None,
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        self.store.write(&path, &bytes, 0o644).await
    }

    /// Read the record for `kid`: origin first, falling back to archive.
    /// Returns `None` if neither exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure
    /// other than the record being absent.
    pub async fn read(&self, domain: &str, kid: &str) -> AppResult<Option<KeyMetadata>> {
        if let Some(record) = self.read_path(&origin_path(domain, kid)).await? {
            return Ok(Some(record));
        }
        self.read_path(&archive_path(kid)).await
    }

    async fn read_path(&self, path: &str) -> AppResult<Option<KeyMetadata>> {
        if !self.store.exists(path).await {
            return Ok(None);
        }
        let bytes = self.store.read(path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Read the current record (origin or archive), set `expired_at`, and
    /// write it to the archive location. The origin file is left
    /// untouched by this call. Returns `None` if no current record
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn add_expiry(
        &self,
        domain: &str,
        kid: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Option<KeyMetadata>> {
        let Some(mut record) = self.read(domain, kid).await? else {
            return Ok(None);
        };
        record.expired_at = Some(expires_at);
        let bytes = serde_json::to_vec_pretty(&record)?;
        self.store.write(&archive_path(kid), &bytes, 0o644).await?;
        Ok(Some(record))
    }

    /// Idempotently delete the origin record for `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_origin(&self, domain: &str, kid: &str) -> AppResult<()> {
        self.store.delete(&origin_path(domain, kid)).await
    }

    /// Idempotently delete the archive record for `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn delete_archive(&self, kid: &str) -> AppResult<()> {
        self.store.delete(&archive_path(kid)).await
    }

    /// List every archived record whose `expired_at` is strictly in the
    /// past relative to `now`. Pure and monotonic in `now`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<KeyMetadata>> {
        let kids = self.store.list_stems("metadata/keys/archived").await?;
        let mut expired = Vec::new();
        for kid in kids {
            if let Some(record) = self.read_path(&archive_path(&kid)).await? {
                if record.expired_at.is_some_and(|at| at < now) {
                    expired.push(record);
                }
            }
        }
        Ok(expired)
    }
}
