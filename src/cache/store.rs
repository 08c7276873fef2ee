//! Filesystem access for the cache tree.
//!
//! Writes go to a uniquely named temp file beside the target and are renamed
//! into place, so readers see either the previous content or the complete
//! new content.  Concurrent writers to the same key race; the last rename
//! wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::CacheKey;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Handle on the cache root directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    base_path: PathBuf,
}

impl CacheStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Absolute on-disk path for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.base_path.join(key.as_str())
    }

    /// Metadata for `key`, or `None` when nothing is cached there.  Any other
    /// I/O failure is returned as an error.
    pub async fn stat(&self, key: &CacheKey) -> Result<Option<std::fs::Metadata>> {
        let path = self.path_for(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to stat cache entry {}", path.display()))
            }
        }
    }

    /// Read the full content cached at `key`.
    pub async fn read(&self, key: &CacheKey) -> Result<Bytes> {
        let path = self.path_for(key);
        let body = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read cache entry {}", path.display()))?;
        Ok(Bytes::from(body))
    }

    /// Replace the content at `key`, creating parent directories as needed.
    pub async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create parent dirs for {}", path.display()))?;
        }

        let tmp_path = tmp_path_for(&path);
        let written = write_file(&tmp_path, body).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| {
                format!("rename {} → {}", tmp_path.display(), path.display())
            });
        }

        debug!(cache_key = %key, bytes = body.len(), "cache entry written");
        Ok(())
    }

    /// Names of the immediate subdirectories of the cache root, sorted.
    /// Each one is an owner that has been served at least once.
    pub async fn list_owners(&self) -> Result<Vec<String>> {
        let mut owners = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(owners),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "failed to read cache directory: {}",
                        self.base_path.display()
                    )
                });
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to iterate cache directory")?
        {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            owners.push(name);
        }

        owners.sort();
        Ok(owners)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Temp file beside `path`: `.{name}.{pid}-{n}.tmp`.
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}-{n}.tmp", std::process::id()))
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("create temp file {}", path.display()))?;
    file.write_all(body)
        .await
        .with_context(|| format!("write temp file {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
