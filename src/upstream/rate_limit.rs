//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from API responses so the
//! service can report how close it is to being throttled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::HeaderMap;

/// Shared rate-limit state updated after every API response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls before the rate limit resets.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the rate limit window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current remaining calls; `u64::MAX` until the first API response.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Whether a known remaining count has dropped below `buffer`.
    pub fn is_low(&self, buffer: u64) -> bool {
        let remaining = self.remaining();
        remaining != u64::MAX && remaining < buffer
    }

    /// Update state from HTTP response headers.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        if let Some(r) = header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining") {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset") {
            self.reset_at.store(r, Ordering::Relaxed);
        }
    }

    /// Seconds until the window resets, or 0 if already reset.
    pub fn reset_in_secs(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.reset_at().saturating_sub(now)
    }
}

fn header_u64(headers: &HeaderMap, primary: &str, fallback: &str) -> Option<u64> {
    headers
        .get(primary)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}
