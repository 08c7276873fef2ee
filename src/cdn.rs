//! Request pipeline: resolved path → resource → freshness verdict → sync →
//! response.

use std::sync::Arc;
use std::time::SystemTime;

use axum::response::Response;
use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::cache::CacheStore;
use crate::config::{Config, FreshnessConfig};
use crate::freshness::{self, Verdict};
use crate::http::handler::AppError;
use crate::metrics::MetricsRegistry;
use crate::minify::Minifier;
use crate::render;
use crate::resolve::Resolution;
use crate::resource::Resource;
use crate::sync::Syncer;
use crate::upstream::Upstream;

pub struct Cdn {
    store: CacheStore,
    syncer: Arc<Syncer>,
    freshness: FreshnessConfig,
    root_org: String,
    metrics: MetricsRegistry,
}

impl Cdn {
    pub fn new(
        config: &Config,
        store: CacheStore,
        upstream: Arc<dyn Upstream>,
        minifier: Arc<dyn Minifier>,
        metrics: MetricsRegistry,
    ) -> Self {
        let syncer = Syncer::new(
            store.clone(),
            upstream,
            minifier,
            &config.upstream,
            metrics.clone(),
        );
        Self {
            store,
            syncer: Arc::new(syncer),
            freshness: config.freshness.clone(),
            root_org: config.upstream.root_org.clone(),
            metrics,
        }
    }

    /// Serve one resolved request.
    ///
    /// Fresh entries are served from cache.  Entries in the second half of
    /// their window are read first and then refreshed on a detached task, so
    /// the response always carries the pre-refresh bytes.  Stale or absent
    /// entries are refreshed before they are read.
    #[instrument(skip(self), fields(kind = resolution.classification().as_str()))]
    pub async fn serve(
        &self,
        resolution: Resolution,
        wants_html: bool,
    ) -> Result<Response, AppError> {
        self.metrics
            .metrics
            .record_request(resolution.classification().as_str());

        let Some(resource) = Resource::from_resolution(resolution, &self.root_org) else {
            return Err(AppError::NotFound);
        };

        let key = resource.cache_key();
        let window = resource.freshness_window(&self.freshness);
        let verdict = freshness::decide(&self.store, &key, window, SystemTime::now()).await?;
        self.metrics.metrics.record_verdict(verdict.as_str());
        info!(cache_key = %key, verdict = verdict.as_str(), "serving");

        let body = match verdict {
            Verdict::Fresh => self.store.read(&key).await?,
            Verdict::StaleBackground => {
                let body = self.store.read(&key).await?;
                self.syncer.spawn_background(resource.clone());
                body
            }
            Verdict::StaleSync | Verdict::Absent => {
                let outcome = self.syncer.sync(&resource).await?;
                debug!(cache_key = %key, ?outcome, "synced before serving");
                self.store.read(&key).await?
            }
        };

        self.render(&resource, body, wants_html).await
    }

    async fn render(
        &self,
        resource: &Resource,
        body: Bytes,
        wants_html: bool,
    ) -> Result<Response, AppError> {
        let resp = match resource {
            Resource::File(file) => render::render_file(file, body),
            Resource::Repo(repo) if wants_html => render::render_repo_html(repo, &body)?,
            Resource::User(user) if wants_html => render::render_user_html(user, &body)?,
            Resource::Repo(_) | Resource::User(_) => render::render_json(body),
            Resource::Root(_) => {
                let owners = self.store.list_owners().await?;
                render::render_root_html(&owners)?
            }
        };
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    use super::*;
    use crate::cache::CacheKey;
    use crate::resolve::resolve;
    use crate::testing::{FakeMinifier, FakeUpstream, test_config};

    struct Harness {
        _dir: tempfile::TempDir,
        store: CacheStore,
        upstream: Arc<FakeUpstream>,
        metrics: MetricsRegistry,
        cdn: Cdn,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = CacheStore::new(dir.path());
        let upstream = Arc::new(FakeUpstream::default());
        let metrics = MetricsRegistry::new();
        let cdn = Cdn::new(
            &config,
            store.clone(),
            upstream.clone(),
            Arc::new(FakeMinifier::default()),
            metrics.clone(),
        );
        Harness {
            _dir: dir,
            store,
            upstream,
            metrics,
            cdn,
        }
    }

    async fn get(h: &Harness, path: &str, html: bool) -> Response {
        match h.cdn.serve(resolve(path), html).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        }
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    fn age(h: &Harness, key: &CacheKey, by: Duration) {
        let file = std::fs::File::options()
            .write(true)
            .open(h.store.path_for(key))
            .unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    async fn wait_for_calls(upstream: &FakeUpstream, path: &str, n: usize) {
        for _ in 0..200 {
            if upstream.calls_to(path) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} upstream calls to {path}");
    }

    #[tokio::test]
    async fn absent_file_is_fetched_once_then_served_from_cache() {
        let h = harness();
        h.upstream.set_raw("/acme/w/main/a.js", 200, "let a;");

        let first = get(&h, "/acme/w/a.js", false).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(&body_bytes(first).await[..], b"let a;");

        let second = get(&h, "/acme/w/a.js", false).await;
        assert_eq!(&body_bytes(second).await[..], b"let a;");
        assert_eq!(h.upstream.calls_to("/acme/w/main/a.js"), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_both_serve_full_content() {
        let h = harness();
        h.upstream.set_raw("/acme/w/main/a.js", 200, "let a;");

        let (first, second) = tokio::join!(
            get(&h, "/acme/w/a.js", false),
            get(&h, "/acme/w/a.js", false)
        );

        for resp in [first, second] {
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(&body_bytes(resp).await[..], b"let a;");
        }
        // No single-flight: each miss may fetch on its own.
        let calls = h.upstream.calls_to("/acme/w/main/a.js");
        assert!((1..=2).contains(&calls), "{calls} upstream calls");
        let key = CacheKey::from_parts(["acme", "w", "main", "a.js"]);
        assert_eq!(&h.store.read(&key).await.unwrap()[..], b"let a;");
    }

    #[tokio::test]
    async fn aging_main_file_refreshes_in_background_and_serves_old_bytes() {
        let h = harness();
        let key = CacheKey::from_parts(["acme", "w", "main", "a.js"]);
        h.store.write(&key, b"old").await.unwrap();
        age(&h, &key, Duration::from_secs(200));
        h.upstream.set_raw("/acme/w/main/a.js", 200, "new");

        let resp = get(&h, "/acme/w/a.js", false).await;
        assert_eq!(&body_bytes(resp).await[..], b"old");

        wait_for_calls(&h.upstream, "/acme/w/main/a.js", 1).await;
        for _ in 0..200 {
            if &h.store.read(&key).await.unwrap()[..] == b"new" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(&h.store.read(&key).await.unwrap()[..], b"new");
        assert_eq!(h.upstream.calls_to("/acme/w/main/a.js"), 1);
    }

    #[tokio::test]
    async fn expired_main_file_is_refreshed_before_serving() {
        let h = harness();
        let key = CacheKey::from_parts(["acme", "w", "main", "a.js"]);
        h.store.write(&key, b"old").await.unwrap();
        age(&h, &key, Duration::from_secs(300));
        h.upstream.set_raw("/acme/w/main/a.js", 200, "new");

        let resp = get(&h, "/acme/w/a.js", false).await;
        assert_eq!(&body_bytes(resp).await[..], b"new");
    }

    #[tokio::test]
    async fn tagged_file_never_expires() {
        let h = harness();
        let key = CacheKey::from_parts(["acme", "w", "v1.2.3", "a.js"]);
        h.store.write(&key, b"pinned").await.unwrap();
        age(&h, &key, Duration::from_secs(10 * 365 * 24 * 3600));

        let resp = get(&h, "/acme/w@1.2.3/a.js", false).await;
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "immutable");
        assert_eq!(&body_bytes(resp).await[..], b"pinned");
        assert!(h.upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_minified_file_is_built_from_cached_source() {
        let h = harness();
        let source = CacheKey::from_parts(["acme", "w", "main", "foo.js"]);
        h.store.write(&source, b"let a = 1;\n").await.unwrap();

        let resp = get(&h, "/acme/w/foo.min.js", false).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_bytes(resp).await[..], b"leta=1;");
        let target = CacheKey::from_parts(["acme", "w", "main", "foo.min.js"]);
        assert_eq!(&h.store.read(&target).await.unwrap()[..], b"leta=1;");
    }

    #[tokio::test]
    async fn upstream_404_passes_through_with_url() {
        let h = harness();

        let resp = get(&h, "/acme/w/nope.txt", false).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_bytes(resp).await;
        assert_eq!(
            &body[..],
            b"fail status: 404 (https://raw.fake/acme/w/main/nope.txt)"
        );
    }

    #[tokio::test]
    async fn user_listing_falls_back_to_user_endpoint() {
        let h = harness();
        h.upstream.set_api(
            "/users/alice/repos?per_page=200",
            200,
            r#"[{"name":"dots","stargazers_count":1}]"#,
        );

        let resp = get(&h, "/alice", true).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
        assert_eq!(html.matches("<tr>").count(), 2);
        assert_eq!(h.upstream.calls().len(), 2);
    }

    #[tokio::test]
    async fn listing_json_and_html_views() {
        let h = harness();
        let json = r#"[{"tag_name":"v1.0.0"},{"tag_name":"v0.9.0"},{"tag_name":"v0.1.0"}]"#;
        h.upstream
            .set_api("/repos/acme/w/releases?per_page=200", 200, json);

        let raw = get(&h, "/acme/w", false).await;
        assert_eq!(raw.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_bytes(raw).await.len(), json.len());

        let html = get(&h, "/acme/w?html", true).await;
        let html = String::from_utf8(body_bytes(html).await.to_vec()).unwrap();
        assert_eq!(html.matches("<tr>").count(), 4);
        assert_eq!(h.upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn root_lists_cached_owners_without_raw_fetch() {
        let h = harness();
        h.upstream.set_api("/orgs/nuxodin/repos?per_page=200", 200, "[]");
        h.store
            .write(&CacheKey::from_parts(["acme", "w", "main", "a.js"]), b"x")
            .await
            .unwrap();

        let resp = get(&h, "/", false).await;

        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        let html = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
        assert!(html.contains(r#"href="/acme?html""#));
        assert_eq!(
            h.upstream.calls(),
            vec![crate::upstream::UpstreamTarget::Api(
                "/orgs/nuxodin/repos?per_page=200".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn directory_collision_is_unimplemented() {
        let h = harness();
        h.store
            .write(&CacheKey::from_parts(["acme", "w", "main", "lib", "a.js"]), b"x")
            .await
            .unwrap();

        let resp = get(&h, "/acme/w/lib", false).await;

        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        assert!(h.upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_path_is_not_found_without_upstream_calls() {
        let h = harness();

        let resp = get(&h, "/acme/../etc", false).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(h.upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn verdicts_are_counted() {
        let h = harness();
        h.upstream.set_raw("/acme/w/main/a.js", 200, "x");

        get(&h, "/acme/w/a.js", false).await;
        get(&h, "/acme/w/a.js", false).await;

        let text = h.metrics.encode().unwrap();
        assert!(text.contains("forgecdn_cache_verdicts_total{verdict=\"absent\"} 1"));
        assert!(text.contains("forgecdn_cache_verdicts_total{verdict=\"fresh\"} 1"));
    }
}
