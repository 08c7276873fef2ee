//! Upstream forge access.
//!
//! The [`Upstream`] trait is the only way the rest of the crate talks to the
//! raw-content host or the hosting API, so the request pipeline can be
//! exercised against an in-process fake.

pub mod github;
pub mod rate_limit;

use std::fmt;

use bytes::Bytes;

pub use github::GitHubUpstream;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// What to fetch.  Paths start with `/` and may carry a query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpstreamTarget {
    /// File on the raw-content host: `/{owner}/{repo}/{tag}/{file}`.
    Raw(String),
    /// Hosting API call, sent with basic auth.
    Api(String),
}

impl UpstreamTarget {
    pub fn path(&self) -> &str {
        match self {
            Self::Raw(p) | Self::Api(p) => p,
        }
    }

    /// Short label used for metrics.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Api(_) => "api",
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.endpoint(), self.path())
    }
}

/// A completed upstream exchange.  Only `body` of a 200 is ever persisted.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Absolute URL that was requested.
    pub url: String,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A 200 body grew past the caller's limit.  `size` is the declared
    /// length, or the bytes read when reading stopped.
    #[error("upstream body from {url} is {size} bytes, over the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Outbound fetches against the forge.  Transport failures are errors; any
/// HTTP status (including 404) is a successful [`UpstreamResponse`].
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch `target`.  With `max_body` set, a 200 body longer than that is
    /// refused with [`FetchError::TooLarge`] before it is fully buffered.
    async fn fetch(
        &self,
        target: &UpstreamTarget,
        max_body: Option<u64>,
    ) -> Result<UpstreamResponse, FetchError>;
}
