//! Upstream fetch-and-persist cycle.
//!
//! [`Syncer::sync`] fetches a resource from upstream and writes a 200 body
//! to its cache key.  A 404 on a minified file is answered by minifying the
//! cached (or freshly fetched) non-minified sibling; any other 404 and all
//! other statuses are reported to the caller.  Whether a sync is awaited or
//! detached is the caller's choice; [`Syncer::spawn_background`] detaches it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::config::UpstreamConfig;
use crate::metrics::MetricsRegistry;
use crate::minify::Minifier;
use crate::resource::{FileResource, Resource};
use crate::upstream::{FetchError, Upstream, UpstreamResponse, UpstreamTarget};

// ---------------------------------------------------------------------------
// Outcome / error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Upstream answered 200 and the body was cached.
    Fetched,
    /// Upstream had no such file; a minified copy was built locally.
    Minified,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Upstream reported absence and no fallback applied.
    #[error("fail status: {status} ({url})")]
    NotFound { url: String, status: u16 },
    /// Upstream answered with a status other than 200 or 404.
    #[error("fail status: {status} ({url})")]
    Upstream { url: String, status: u16 },
    #[error("upstream file {url} is {size} bytes, over the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::TooLarge { url, size, limit } => Self::TooLarge { url, size, limit },
            FetchError::Transport(e) => Self::Internal(e),
        }
    }
}

/// Result of fetching one resource without any fallback.
enum Fetched {
    Stored,
    Missing(UpstreamResponse),
}

// ---------------------------------------------------------------------------
// Syncer
// ---------------------------------------------------------------------------

pub struct Syncer {
    store: CacheStore,
    upstream: Arc<dyn Upstream>,
    minifier: Arc<dyn Minifier>,
    per_page: u32,
    max_file_bytes: Option<u64>,
    metrics: MetricsRegistry,
}

impl Syncer {
    pub fn new(
        store: CacheStore,
        upstream: Arc<dyn Upstream>,
        minifier: Arc<dyn Minifier>,
        config: &UpstreamConfig,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            store,
            upstream,
            minifier,
            per_page: config.per_page,
            max_file_bytes: config.max_file_bytes,
            metrics,
        }
    }

    /// Refresh `resource` from upstream.
    #[instrument(skip(self), fields(cache_key = %resource.cache_key()))]
    pub async fn sync(&self, resource: &Resource) -> Result<SyncOutcome, SyncError> {
        let missing = match self.fetch_and_store(resource).await? {
            Fetched::Stored => return Ok(SyncOutcome::Fetched),
            Fetched::Missing(resp) => resp,
        };

        if let Resource::File(file) = resource
            && self.minify_fallback(file).await?
        {
            return Ok(SyncOutcome::Minified);
        }

        Err(SyncError::NotFound {
            url: missing.url,
            status: missing.status,
        })
    }

    /// Run [`Self::sync`] on a detached task.  The outcome is logged and
    /// otherwise discarded.
    pub fn spawn_background(self: &Arc<Self>, resource: Resource) -> JoinHandle<()> {
        let syncer = Arc::clone(self);
        tokio::spawn(async move {
            match syncer.sync(&resource).await {
                Ok(outcome) => {
                    debug!(cache_key = %resource.cache_key(), ?outcome, "background refresh done");
                }
                Err(e) => {
                    syncer
                        .metrics
                        .metrics
                        .background_refresh_failures_total
                        .inc();
                    warn!(
                        error = %e,
                        cache_key = %resource.cache_key(),
                        "background refresh failed"
                    );
                }
            }
        })
    }

    /// Fetch `resource` and cache a 200 body.  A 404 is returned as
    /// [`Fetched::Missing`]; other statuses are errors.
    async fn fetch_and_store(&self, resource: &Resource) -> Result<Fetched, SyncError> {
        let resp = self.fetch_upstream(resource).await?;

        if resp.is_ok() {
            self.store.write(&resource.cache_key(), &resp.body).await?;
            return Ok(Fetched::Stored);
        }
        if resp.is_not_found() {
            return Ok(Fetched::Missing(resp));
        }

        warn!(url = %resp.url, status = resp.status, "upstream returned unexpected status");
        Err(SyncError::Upstream {
            url: resp.url,
            status: resp.status,
        })
    }

    /// Try each upstream target in turn, moving on only after a 404.
    async fn fetch_upstream(&self, resource: &Resource) -> Result<UpstreamResponse, SyncError> {
        let targets = resource.upstream_targets(self.per_page);
        let last = targets.len().saturating_sub(1);

        for (i, target) in targets.iter().enumerate() {
            // Listings are never size-checked.
            let max_body = match target {
                UpstreamTarget::Raw(_) => self.max_file_bytes,
                UpstreamTarget::Api(_) => None,
            };
            let resp = self.upstream.fetch(target, max_body).await?;
            debug!(upstream = %target, status = resp.status, "upstream answered");
            self.metrics
                .metrics
                .record_fetch(target.endpoint(), resp.status);

            if resp.is_not_found() && i < last {
                debug!(url = %resp.url, "upstream 404, trying fallback endpoint");
                continue;
            }
            return Ok(resp);
        }

        Err(anyhow::anyhow!("no upstream target for {}", resource.cache_key()).into())
    }

    /// Build `file` by minifying its non-minified sibling.  The sibling is
    /// fetched if it is not cached yet, without a fallback of its own.
    ///
    /// Returns `Ok(false)` when there is no sibling or it cannot be read or
    /// minified; only a failure to write the result is an error.
    async fn minify_fallback(&self, file: &FileResource) -> Result<bool, SyncError> {
        let Some((source, loader)) = file.minify_source() else {
            return Ok(false);
        };
        let source = Resource::File(source);
        let source_key = source.cache_key();

        match self.store.stat(&source_key).await {
            Ok(Some(meta)) if meta.is_file() => {}
            Ok(Some(_)) => return Ok(false),
            Ok(None) => match self.fetch_and_store(&source).await {
                Ok(Fetched::Stored) => {}
                Ok(Fetched::Missing(_)) => return Ok(false),
                Err(e) => {
                    warn!(error = %e, cache_key = %source_key, "minify source fetch failed");
                    return Ok(false);
                }
            },
            Err(e) => {
                warn!(error = %e, cache_key = %source_key, "minify source stat failed");
                return Ok(false);
            }
        }

        let body = match self.store.read(&source_key).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, cache_key = %source_key, "minify source read failed");
                return Ok(false);
            }
        };

        let minified = match self.minifier.minify(body, loader).await {
            Ok(minified) => minified,
            Err(e) => {
                warn!(error = %e, cache_key = %source_key, "minifier failed");
                return Ok(false);
            }
        };

        let target = Resource::File(file.clone()).cache_key();
        self.store.write(&target, &minified).await?;
        self.metrics.metrics.minify_fallbacks_total.inc();
        info!(cache_key = %target, source = %source_key, "served minified fallback");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
