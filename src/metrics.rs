use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerdictLabels {
    pub verdict: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FetchLabels {
    pub endpoint: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    pub requests_total: Family<KindLabels, Counter>,
    pub cache_verdicts_total: Family<VerdictLabels, Counter>,
    pub upstream_fetches_total: Family<FetchLabels, Counter>,
    pub minify_fallbacks_total: Counter,
    pub background_refresh_failures_total: Counter,
    pub upstream_api_rate_limit_remaining: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let requests_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "forgecdn_requests",
            "Resolved requests by resource kind",
            requests_total.clone(),
        );

        let cache_verdicts_total = Family::<VerdictLabels, Counter>::default();
        registry.register(
            "forgecdn_cache_verdicts",
            "Freshness decisions by verdict",
            cache_verdicts_total.clone(),
        );

        let upstream_fetches_total = Family::<FetchLabels, Counter>::default();
        registry.register(
            "forgecdn_upstream_fetches",
            "Upstream fetches by endpoint and HTTP status",
            upstream_fetches_total.clone(),
        );

        let minify_fallbacks_total = Counter::default();
        registry.register(
            "forgecdn_minify_fallbacks",
            "Minified files produced locally after an upstream 404",
            minify_fallbacks_total.clone(),
        );

        let background_refresh_failures_total = Counter::default();
        registry.register(
            "forgecdn_background_refresh_failures",
            "Background refreshes that failed and were discarded",
            background_refresh_failures_total.clone(),
        );

        let upstream_api_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "forgecdn_upstream_api_rate_limit_remaining",
            "Remaining upstream API calls before rate limit",
            upstream_api_rate_limit_remaining.clone(),
        );

        Self {
            requests_total,
            cache_verdicts_total,
            upstream_fetches_total,
            minify_fallbacks_total,
            background_refresh_failures_total,
            upstream_api_rate_limit_remaining,
        }
    }

    pub fn record_request(&self, kind: &str) {
        self.requests_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_verdict(&self, verdict: &str) {
        self.cache_verdicts_total
            .get_or_create(&VerdictLabels {
                verdict: verdict.to_string(),
            })
            .inc();
    }

    pub fn record_fetch(&self, endpoint: &str, status: u16) {
        self.upstream_fetches_total
            .get_or_create(&FetchLabels {
                endpoint: endpoint.to_string(),
                status: status.to_string(),
            })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
