//! GitHub implementation of [`Upstream`].
//!
//! Raw files come from the raw-content host without credentials; API calls
//! carry basic auth built from the configured environment variables.

use anyhow::Context;
use bytes::BytesMut;
use reqwest::header;
use tracing::{debug, warn};

use super::rate_limit::RateLimitState;
use super::{FetchError, Upstream, UpstreamResponse, UpstreamTarget};
use crate::config::Config;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

// ---------------------------------------------------------------------------
// Backend struct
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GitHubUpstream {
    http_client: reqwest::Client,
    raw_url: String,
    api_url: String,
    credentials: Option<(String, String)>,
    rate_limit: RateLimitState,
    rate_limit_warn: u64,
}

impl GitHubUpstream {
    pub fn new(config: &Config, http_client: reqwest::Client, rate_limit: RateLimitState) -> Self {
        let creds = &config.upstream_credentials;
        let credentials = match (std::env::var(&creds.user_env), std::env::var(&creds.token_env)) {
            (Ok(user), Ok(token)) => Some((user, token)),
            _ => {
                warn!(
                    user_env = %creds.user_env,
                    token_env = %creds.token_env,
                    "upstream credentials not set; API calls will be unauthenticated"
                );
                None
            }
        };

        Self {
            http_client,
            raw_url: config.upstream.raw_url.trim_end_matches('/').to_string(),
            api_url: config.upstream.api_url.trim_end_matches('/').to_string(),
            credentials,
            rate_limit,
            rate_limit_warn: config.upstream.rate_limit_warn,
        }
    }

    /// Absolute URL for `target`.
    pub fn url_for(&self, target: &UpstreamTarget) -> String {
        match target {
            UpstreamTarget::Raw(path) => format!("{}{path}", self.raw_url),
            UpstreamTarget::Api(path) => format!("{}{path}", self.api_url),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Upstream for GitHubUpstream {
    async fn fetch(
        &self,
        target: &UpstreamTarget,
        max_body: Option<u64>,
    ) -> Result<UpstreamResponse, FetchError> {
        let url = self.url_for(target);
        debug!(%url, "fetching from upstream");

        let mut request = self.http_client.get(&url);
        if let UpstreamTarget::Api(_) = target {
            request = request.header(header::ACCEPT, GITHUB_ACCEPT);
            if let Some((user, token)) = &self.credentials {
                request = request.basic_auth(user, Some(token));
            }
        }

        let mut resp = request
            .send()
            .await
            .with_context(|| format!("failed to reach upstream {url}"))?;

        if let UpstreamTarget::Api(_) = target {
            self.rate_limit.update_from_headers(resp.headers());
            if self.rate_limit.is_low(self.rate_limit_warn) {
                warn!(
                    remaining = self.rate_limit.remaining(),
                    reset_in_secs = self.rate_limit.reset_in_secs(),
                    "upstream API rate limit running low"
                );
            }
        }

        let status = resp.status().as_u16();
        let limit = max_body.filter(|_| status == 200);

        if let (Some(limit), Some(size)) = (limit, resp.content_length())
            && size > limit
        {
            return Err(FetchError::TooLarge { url, size, limit });
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("failed to read upstream body from {url}"))?
        {
            buf.extend_from_slice(&chunk);
            let size = buf.len() as u64;
            if let Some(limit) = limit
                && size > limit
            {
                return Err(FetchError::TooLarge { url, size, limit });
            }
        }
        let body = buf.freeze();

        debug!(%url, status, bytes = body.len(), "upstream responded");
        Ok(UpstreamResponse { status, url, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;

    use super::*;

    fn backend() -> GitHubUpstream {
        backend_at("https://raw.example.com")
    }

    fn backend_at(raw_url: &str) -> GitHubUpstream {
        GitHubUpstream {
            http_client: reqwest::Client::new(),
            raw_url: raw_url.to_string(),
            api_url: "https://api.example.com".to_string(),
            credentials: None,
            rate_limit: RateLimitState::new(),
            rate_limit_warn: 100,
        }
    }

    #[test]
    fn raw_url_joins_path() {
        let target = UpstreamTarget::Raw("/acme/widgets/main/a.js".to_string());
        assert_eq!(
            backend().url_for(&target),
            "https://raw.example.com/acme/widgets/main/a.js"
        );
    }

    #[test]
    fn api_url_keeps_query() {
        let target = UpstreamTarget::Api("/orgs/acme/repos?per_page=200".to_string());
        assert_eq!(
            backend().url_for(&target),
            "https://api.example.com/orgs/acme/repos?per_page=200"
        );
    }

    /// Local raw host answering every path with `status` and `body`.
    async fn raw_host(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().fallback(move || async move { (status, body) });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn raw(path: &str) -> UpstreamTarget {
        UpstreamTarget::Raw(path.to_string())
    }

    #[tokio::test]
    async fn body_over_limit_is_refused() {
        let upstream = backend_at(&raw_host(StatusCode::OK, "0123456789").await);

        let err = upstream.fetch(&raw("/acme/w/main/big.js"), Some(4)).await.unwrap_err();

        match err {
            FetchError::TooLarge { url, size, limit } => {
                assert!(url.ends_with("/acme/w/main/big.js"));
                assert!(size > 4);
                assert_eq!(limit, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_within_limit_is_returned() {
        let upstream = backend_at(&raw_host(StatusCode::OK, "0123456789").await);

        let resp = upstream.fetch(&raw("/acme/w/main/a.js"), Some(10)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"0123456789");

        let resp = upstream.fetch(&raw("/acme/w/main/a.js"), None).await.unwrap();
        assert_eq!(&resp.body[..], b"0123456789");
    }

    #[tokio::test]
    async fn limit_ignores_error_bodies() {
        let upstream = backend_at(&raw_host(StatusCode::NOT_FOUND, "404: Not Found").await);

        let resp = upstream.fetch(&raw("/acme/w/main/a.js"), Some(4)).await.unwrap();

        assert!(resp.is_not_found());
        assert_eq!(&resp.body[..], b"404: Not Found");
    }
}
