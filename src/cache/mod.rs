//! On-disk cache for upstream files and listings.
//!
//! The cache is a directory tree mirroring the request layout:
//! `{owner}/{repo}/{tag}/{file}` for files, and `{owner}/{repo}/__index.json`,
//! `{owner}/__index.json`, `__index.json` for listings.  It is addressed
//! purely by [`CacheKey`] and written with whole-file replacement.

pub mod store;

use std::fmt;

pub use store::CacheStore;

/// File name used for cached listing documents.
pub const INDEX_FILE: &str = "__index.json";

/// Location of a cached resource relative to the cache root, stored without
/// a leading slash (`acme/widgets/v1.2.3/dist/app.js`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from path components.  Components are joined with `/`.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.as_ref().trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}
