// ABOUTME: Namespaced byte storage with POSIX-like permission bits
// ABOUTME: Defines the BlobStore contract and a filesystem reference implementation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Byte-level storage abstraction for PEM artifacts and metadata records.
//! The core never touches `std::fs` directly; every read/write/delete goes
//! through a [`BlobStore`] so that a cloud-object-store-backed
//! implementation can be substituted without touching the rest of the
//! crate.

use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Permission mode for private artifacts (owner read/write only).
pub const PRIVATE_MODE: u32 = 0o600;
/// Permission mode for public artifacts (world readable).
pub const PUBLIC_MODE: u32 = 0o644;

/// Namespaced byte I/O with POSIX-like permission control.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the bytes at `path`, relative to the store's root.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::NotFound`] if absent, or
    /// [`crate::errors::ErrorKind::Transient`] on other I/O failure.
    async fn read(&self, path: &str) -> AppResult<Vec<u8>>;

    /// Write `bytes` to `path`, creating parent directories as needed, and
    /// set the file's permission bits to `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    async fn write(&self, path: &str, bytes: &[u8], mode: u32) -> AppResult<()>;

    /// Delete the file at `path`. Idempotent: a missing file is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure
    /// other than the file already being absent.
    async fn delete(&self, path: &str) -> AppResult<()>;

    /// True if `path` exists.
    async fn exists(&self, path: &str) -> bool;

    /// List the file stems (no extension) of every `.pem`/`.meta` entry
    /// directly under `dir_path`. Returns an empty vec if the directory
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    async fn list_stems(&self, dir_path: &str) -> AppResult<Vec<String>>;

    /// Ensure every directory needed to hold artifacts for `domain`
    /// exists. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorKind::Transient`] on I/O failure.
    async fn ensure_dirs(&self, domain: &str) -> AppResult<()>;
}

/// Filesystem-backed [`BlobStore`] rooted at a configurable directory.
///
/// Layout (see the crate's data model): `keys/<domain>/private/<kid>.pem`,
/// `keys/<domain>/public/<kid>.pem`, `metadata/keys/<domain>/<kid>.meta`,
/// `metadata/keys/archived/<kid>.meta`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The root itself is created lazily
    /// on first write, not at construction time.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, path: &str) -> AppResult<Vec<u8>> {
        tokio::fs::read(self.resolve(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("blob '{path}'"))
            } else {
                AppError::from(e)
            }
        })
    }

    async fn write(&self, path: &str, bytes: &[u8], mode: u32) -> AppResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        set_permissions(&full, mode).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> AppResult<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::from(e)),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn list_stems(&self, dir_path: &str) -> AppResult<Vec<String>> {
        let full = self.resolve(dir_path);
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::from(e)),
        };

        let mut stems = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "pem" || ext == "meta") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stems.push(stem.to_owned());
                }
            }
        }
        Ok(stems)
    }

    async fn ensure_dirs(&self, domain: &str) -> AppResult<()> {
        for sub in ["keys/{domain}/private", "keys/{domain}/public", "metadata/keys/{domain}", "metadata/keys/archived"] {
            let rendered = sub.replace("{domain}", domain);
            tokio::fs::create_dir_all(self.resolve(&rendered)).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: u32) -> AppResult<()> {
    Ok(())
}
