use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub upstream_credentials: UpstreamCredentials,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub minify: MinifyConfig,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the raw-content host (e.g. `https://raw.githubusercontent.com`).
    #[serde(default = "default_raw_url")]
    pub raw_url: String,
    /// Base URL of the hosting API (e.g. `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Organization whose repositories back the root index.
    pub root_org: String,
    /// Page size requested from every listing endpoint.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Raw files larger than this many bytes are refused instead of cached.
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
    /// Log a warning once the API rate limit drops below this many calls.
    #[serde(default = "default_rate_limit_warn")]
    pub rate_limit_warn: u64,
}

fn default_raw_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
    200
}

fn default_rate_limit_warn() -> u64 {
    100
}

// ---------------------------------------------------------------------------
// Upstream credentials
// ---------------------------------------------------------------------------

/// Names of the environment variables holding the API basic-auth pair.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamCredentials {
    #[serde(default = "default_user_env")]
    pub user_env: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for UpstreamCredentials {
    fn default() -> Self {
        Self {
            user_env: default_user_env(),
            token_env: default_token_env(),
        }
    }
}

fn default_user_env() -> String {
    "FORGECDN_GIT_USER".to_string()
}

fn default_token_env() -> String {
    "FORGECDN_GIT_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8081`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:8081".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the on-disk cache.
    pub path: String,
}

// ---------------------------------------------------------------------------
// Freshness windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FreshnessConfig {
    /// Maximum age (seconds) of a file cached under the `main` tag.
    #[serde(default = "default_main_file_max_age")]
    pub main_file_max_age: u64,
    /// Maximum age (seconds) of a release or repository listing.
    #[serde(default = "default_listing_max_age")]
    pub listing_max_age: u64,
}

impl FreshnessConfig {
    pub fn main_file_window(&self) -> Duration {
        Duration::from_secs(self.main_file_max_age)
    }

    pub fn listing_window(&self) -> Duration {
        Duration::from_secs(self.listing_max_age)
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            main_file_max_age: default_main_file_max_age(),
            listing_max_age: default_listing_max_age(),
        }
    }
}

fn default_main_file_max_age() -> u64 {
    240
}

fn default_listing_max_age() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Minifier
// ---------------------------------------------------------------------------

/// External minifier invocation.  The source is piped to stdin and the
/// minified output read from stdout.  `{loader}` inside `args` is replaced
/// by `js` or `css`.
#[derive(Debug, Clone, Deserialize)]
pub struct MinifyConfig {
    #[serde(default = "default_minify_program")]
    pub program: String,
    #[serde(default = "default_minify_args")]
    pub args: Vec<String>,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            program: default_minify_program(),
            args: default_minify_args(),
        }
    }
}

fn default_minify_program() -> String {
    "esbuild".to_string()
}

fn default_minify_args() -> Vec<String> {
    vec!["--minify".to_string(), "--loader={loader}".to_string()]
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid YAML config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.storage.path.trim().is_empty(),
        "storage.path must not be empty"
    );
    anyhow::ensure!(
        !config.upstream.root_org.trim().is_empty(),
        "upstream.root_org must not be empty"
    );
    for (name, url) in [
        ("upstream.raw_url", &config.upstream.raw_url),
        ("upstream.api_url", &config.upstream.api_url),
    ] {
        anyhow::ensure!(
            url.starts_with("https://") || url.starts_with("http://"),
            "{name} must be an http(s) URL, got {url:?}"
        );
    }
    anyhow::ensure!(
        config.freshness.main_file_max_age > 0 && config.freshness.listing_max_age > 0,
        "freshness windows must be greater than zero"
    );
    anyhow::ensure!(config.upstream.per_page > 0, "upstream.per_page must be > 0");
    anyhow::ensure!(
        !config.minify.program.trim().is_empty(),
        "minify.program must not be empty"
    );
    Ok(())
}
