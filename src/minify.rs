//! Minification fallback.
//!
//! When upstream has no `foo.min.js`, the service can build one from the
//! cached `foo.js` by running an external minifier over it.

use std::process::Stdio;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::MinifyConfig;

/// Source language handed to the minifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Css,
}

impl Loader {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Css => "css",
        }
    }
}

const MINIFIED_SUFFIXES: &[(&str, &str, Loader)] = &[
    (".min.js", ".js", Loader::Js),
    (".min.mjs", ".mjs", Loader::Js),
    (".min.css", ".css", Loader::Css),
];

/// For a minified file name, the non-minified sibling it can be built from.
///
/// `dist/app.min.js` → `("dist/app.js", Loader::Js)`.
pub fn minified_source(file: &str) -> Option<(String, Loader)> {
    MINIFIED_SUFFIXES.iter().find_map(|(suffix, plain, loader)| {
        let stem = file.strip_suffix(suffix)?;
        if stem.is_empty() || stem.ends_with('/') {
            return None;
        }
        Some((format!("{stem}{plain}"), *loader))
    })
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Minifier: Send + Sync {
    async fn minify(&self, source: Bytes, loader: Loader) -> Result<Bytes>;
}

// ---------------------------------------------------------------------------
// External command
// ---------------------------------------------------------------------------

/// Runs the configured program with the source on stdin and takes stdout as
/// the minified result.
#[derive(Debug, Clone)]
pub struct CommandMinifier {
    program: String,
    args: Vec<String>,
}

impl CommandMinifier {
    pub fn new(config: &MinifyConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    fn args_for(&self, loader: Loader) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{loader}", loader.as_str()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Minifier for CommandMinifier {
    async fn minify(&self, source: Bytes, loader: Loader) -> Result<Bytes> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(loader))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn minifier {}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .context("failed to capture minifier stdin")?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&source).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait on minifier")?;
        writer
            .await
            .context("minifier stdin task panicked")?
            .context("failed to write minifier stdin")?;

        anyhow::ensure!(
            output.status.success(),
            "minifier exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        debug!(
            program = %self.program,
            loader = loader.as_str(),
            bytes = output.stdout.len(),
            "minified"
        );
        Ok(Bytes::from(output.stdout))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
