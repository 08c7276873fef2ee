mod cache;
mod cdn;
mod config;
mod freshness;
mod health;
mod http;
mod metrics;
mod minify;
mod render;
mod resolve;
mod resource;
mod sync;
mod upstream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cache::CacheStore;
use crate::cdn::Cdn;
use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::minify::{CommandMinifier, Minifier};
use crate::upstream::rate_limit::RateLimitState;
use crate::upstream::{GitHubUpstream, Upstream};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "forgecdn", about = "Caching CDN for forge-hosted files")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/forgecdn/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cdn: Arc<Cdn>,
    pub metrics: MetricsRegistry,
    pub http_client: reqwest::Client,
    pub rate_limit: RateLimitState,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .proxy
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting forgecdn");

    // ---- Ensure cache directory exists ----
    tokio::fs::create_dir_all(&config.storage.path)
        .await
        .with_context(|| format!("failed to create cache dir: {}", config.storage.path))?;

    // ---- Upstream ----
    let http_client = reqwest::Client::builder()
        .user_agent("forgecdn/0.1")
        .build()
        .context("failed to build reqwest client")?;
    let rate_limit = RateLimitState::new();
    let upstream: Arc<dyn Upstream> = Arc::new(GitHubUpstream::new(
        &config,
        http_client.clone(),
        rate_limit.clone(),
    ));
    tracing::info!(
        raw_url = %config.upstream.raw_url,
        api_url = %config.upstream.api_url,
        root_org = %config.upstream.root_org,
        "upstream initialised"
    );

    // ---- Minifier ----
    let minifier: Arc<dyn Minifier> = Arc::new(CommandMinifier::new(&config.minify));

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Pipeline ----
    let cdn = Cdn::new(
        &config,
        CacheStore::new(&config.storage.path),
        upstream,
        minifier,
        metrics.clone(),
    );

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        cdn: Arc::new(cdn),
        metrics,
        http_client,
        rate_limit,
    };

    run_http_server(state).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
