//! Axum router and HTTP request handlers for the CDN.
//!
//! Routes:
//! - `GET  /favicon.ico` - Always 404, never resolved
//! - `GET  /healthz`     - Health check
//! - `GET  /metrics`     - Prometheus metrics
//! - `GET  /{*path}`     - Files, release listings, owner listings, root index

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{error, instrument, warn};

use crate::AppState;
use crate::freshness::CacheError;
use crate::resolve::resolve;
use crate::sync::SyncError;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/favicon.ico", get(handle_favicon))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_cdn)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Every path not claimed by another route.
///
/// `?html` switches listings to their HTML view.  Successful responses carry
/// permissive CORS headers.
#[instrument(skip(state, uri), fields(path = %uri.path()))]
async fn handle_cdn(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Ok((
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response());
    }

    let wants_html = uri.query().is_some_and(has_html_marker);
    let mut resp = state.cdn.serve(resolve(uri.path()), wants_html).await?;

    if resp.status().is_success() {
        let headers = resp.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("*"),
        );
    }
    Ok(resp)
}

async fn handle_favicon() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
        http_client: state.http_client.clone(),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the CDN.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let remaining = i64::try_from(state.rate_limit.remaining()).unwrap_or(i64::MAX);
    state
        .metrics
        .metrics
        .upstream_api_rate_limit_remaining
        .set(remaining);

    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Whether the query string carries the `html` marker (`?html`, `?html=`,
/// `?a=b&html`).
fn has_html_marker(query: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some("html"))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Unified error type for CDN handlers.
#[derive(Debug)]
pub enum AppError {
    /// The path does not name a resource.
    NotFound,
    /// Upstream reported 404 and no fallback produced the resource.
    UpstreamNotFound { url: String, status: u16 },
    /// Upstream answered with a status other than 200 or 404.
    Upstream { url: String, status: u16 },
    /// The upstream file exceeds the configured size limit.
    TooLarge(String),
    /// The request maps onto something the CDN does not serve, such as a
    /// directory.
    Unimplemented(String),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            AppError::UpstreamNotFound { url, status } => (
                StatusCode::NOT_FOUND,
                format!("fail status: {status} ({url})"),
            )
                .into_response(),
            AppError::Upstream { url, status } => {
                warn!(%url, status, "upstream failure surfaced to client");
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (code, format!("fail status: {status} ({url})")).into_response()
            }
            AppError::TooLarge(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Unimplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg).into_response(),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound { url, status } => AppError::UpstreamNotFound { url, status },
            SyncError::Upstream { url, status } => AppError::Upstream { url, status },
            err @ SyncError::TooLarge { .. } => AppError::TooLarge(err.to_string()),
            SyncError::Internal(err) => AppError::Internal(err),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Directory(_) => {
                AppError::Unimplemented("directory listings are not implemented".to_string())
            }
            CacheError::Io(err) => AppError::Internal(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
