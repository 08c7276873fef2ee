//! Freshness decisions for cached entries.
//!
//! An entry younger than half its window is served as-is.  Between half and
//! the full window it is served while a background refresh runs.  Past the
//! window it must be refreshed before it is served.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::cache::{CacheKey, CacheStore};

/// Maximum age of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Bounded(Duration),
    /// Never refreshed once present.
    Infinite,
}

/// What to do with a cache entry before serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Serve the cached content; no refresh.
    Fresh,
    /// Serve the cached content and refresh without waiting.
    StaleBackground,
    /// Refresh, then serve.
    StaleSync,
    /// Nothing cached; fetch, then serve.
    Absent,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::StaleBackground => "stale_background",
            Self::StaleSync => "stale_sync",
            Self::Absent => "absent",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache key points at a directory; directory listings are not served.
    #[error("cache entry {0} is a directory")]
    Directory(PathBuf),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Classify an entry of the given age against `window`.
pub fn classify_age(age: Duration, window: Window) -> Verdict {
    let Window::Bounded(window) = window else {
        return Verdict::Fresh;
    };
    if age <= window / 2 {
        Verdict::Fresh
    } else if age <= window {
        Verdict::StaleBackground
    } else {
        Verdict::StaleSync
    }
}

/// Inspect the cache entry at `key` and decide how to serve it at `now`.
///
/// An entry whose modification time is unavailable, or lies in the future,
/// is treated as just written.
pub async fn decide(
    store: &CacheStore,
    key: &CacheKey,
    window: Window,
    now: SystemTime,
) -> Result<Verdict, CacheError> {
    let Some(meta) = store.stat(key).await? else {
        return Ok(Verdict::Absent);
    };
    if meta.is_dir() {
        return Err(CacheError::Directory(store.path_for(key)));
    }

    let age = meta
        .modified()
        .ok()
        .and_then(|mtime| now.duration_since(mtime).ok())
        .unwrap_or_default();
    let verdict = classify_age(age, window);
    debug!(cache_key = %key, age_secs = age.as_secs(), verdict = verdict.as_str(), "freshness decided");
    Ok(verdict)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
