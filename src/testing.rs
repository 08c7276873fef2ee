//! In-process stand-ins for the forge and the minifier.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use bytes::Bytes;

use crate::config::{
    Config, FreshnessConfig, MinifyConfig, ProxyConfig, StorageConfig, UpstreamConfig,
    UpstreamCredentials,
};
use crate::minify::{Loader, Minifier};
use crate::upstream::{FetchError, Upstream, UpstreamResponse, UpstreamTarget};

pub const FAKE_RAW_URL: &str = "https://raw.fake";
pub const FAKE_API_URL: &str = "https://api.fake";

pub fn test_config(storage: &Path) -> Config {
    Config {
        upstream: UpstreamConfig {
            raw_url: FAKE_RAW_URL.to_string(),
            api_url: FAKE_API_URL.to_string(),
            root_org: "nuxodin".to_string(),
            per_page: 200,
            max_file_bytes: None,
            rate_limit_warn: 100,
        },
        upstream_credentials: UpstreamCredentials::default(),
        proxy: ProxyConfig::default(),
        storage: StorageConfig {
            path: storage.display().to_string(),
        },
        freshness: FreshnessConfig::default(),
        minify: MinifyConfig::default(),
    }
}

/// Answers from a fixed table; anything not in it is a 404.
#[derive(Default)]
pub struct FakeUpstream {
    responses: Mutex<HashMap<UpstreamTarget, (u16, Bytes)>>,
    calls: Mutex<Vec<UpstreamTarget>>,
}

impl FakeUpstream {
    pub fn set_raw(&self, path: &str, status: u16, body: &str) {
        self.set(UpstreamTarget::Raw(path.to_string()), status, body);
    }

    pub fn set_api(&self, path: &str, status: u16, body: &str) {
        self.set(UpstreamTarget::Api(path.to_string()), status, body);
    }

    fn set(&self, target: UpstreamTarget, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(target, (status, Bytes::copy_from_slice(body.as_bytes())));
    }

    pub fn calls(&self) -> Vec<UpstreamTarget> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.path() == path)
            .count()
    }
}

#[async_trait::async_trait]
impl Upstream for FakeUpstream {
    async fn fetch(
        &self,
        target: &UpstreamTarget,
        max_body: Option<u64>,
    ) -> Result<UpstreamResponse, FetchError> {
        self.calls.lock().unwrap().push(target.clone());
        let base = match target {
            UpstreamTarget::Raw(_) => FAKE_RAW_URL,
            UpstreamTarget::Api(_) => FAKE_API_URL,
        };
        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or((404, Bytes::from_static(b"404: Not Found")));
        let url = format!("{base}{}", target.path());
        if let Some(limit) = max_body
            && status == 200
            && body.len() as u64 > limit
        {
            return Err(FetchError::TooLarge {
                url,
                size: body.len() as u64,
                limit,
            });
        }
        Ok(UpstreamResponse { status, url, body })
    }
}

/// Strips all ASCII whitespace.
#[derive(Default)]
pub struct FakeMinifier {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeMinifier {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Minifier for FakeMinifier {
    async fn minify(&self, source: Bytes, _loader: Loader) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.failing.load(Ordering::SeqCst), "minifier failed");
        let out: Vec<u8> = source
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        Ok(Bytes::from(out))
    }
}
