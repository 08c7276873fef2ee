//! Resource kinds served by the CDN.
//!
//! Each kind knows its cache key, its freshness window, and which upstream
//! endpoint(s) back it.  A [`Resource`] is built once per request from the
//! resolved path and never persisted; only the fetched body is.

use crate::cache::{CacheKey, INDEX_FILE};
use crate::config::FreshnessConfig;
use crate::freshness::Window;
use crate::minify::{Loader, minified_source};
use crate::resolve::{DEFAULT_TAG, Resolution, is_semver_tag};
use crate::upstream::UpstreamTarget;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// A single file at a tag: `/{owner}/{repo}/{tag}/{file}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    pub owner: String,
    pub repo: String,
    /// Normalized tag.
    pub tag: String,
    pub file: String,
    /// Fixed when the request is classified: the tag looked like a release
    /// version.  Drives the `cache-control: immutable` response header.
    pub immutable: bool,
}

impl FileResource {
    pub fn new(owner: String, repo: String, tag: String, file: String) -> Self {
        let immutable = is_semver_tag(&tag);
        Self {
            owner,
            repo,
            tag,
            file,
            immutable,
        }
    }

    /// Path shared by the cache layout and the raw-content host.
    pub fn raw_path(&self) -> String {
        format!("/{}/{}/{}/{}", self.owner, self.repo, self.tag, self.file)
    }

    /// The same repo and tag, different file.
    pub fn sibling(&self, file: String) -> Self {
        Self::new(self.owner.clone(), self.repo.clone(), self.tag.clone(), file)
    }

    /// The non-minified sibling this file can be built from, if any.
    pub fn minify_source(&self) -> Option<(FileResource, Loader)> {
        let (file, loader) = minified_source(&self.file)?;
        Some((self.sibling(file), loader))
    }
}

/// Release listing of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoResource {
    pub owner: String,
    pub repo: String,
}

/// Repository listing of one organization or user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResource {
    pub owner: String,
}

/// Repository listing of the configured well-known organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootResource {
    pub org: String,
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File(FileResource),
    Repo(RepoResource),
    User(UserResource),
    Root(RootResource),
}

impl Resource {
    /// Build the resource for a resolved request.  `None` for paths that
    /// resolved to nothing.
    pub fn from_resolution(resolution: Resolution, root_org: &str) -> Option<Self> {
        let resource = match resolution {
            Resolution::Root => Self::Root(RootResource {
                org: root_org.to_string(),
            }),
            Resolution::User { owner } => Self::User(UserResource { owner }),
            Resolution::Repo { owner, repo } => Self::Repo(RepoResource { owner, repo }),
            Resolution::File {
                owner,
                repo,
                tag,
                file,
            } => Self::File(FileResource::new(owner, repo, tag, file)),
            Resolution::NotFound => return None,
        };
        Some(resource)
    }

    /// Where the fetched body lives in the cache.
    pub fn cache_key(&self) -> CacheKey {
        match self {
            Self::File(f) => CacheKey::from_parts([&f.owner, &f.repo, &f.tag, &f.file]),
            Self::Repo(r) => CacheKey::from_parts([r.owner.as_str(), r.repo.as_str(), INDEX_FILE]),
            Self::User(u) => CacheKey::from_parts([u.owner.as_str(), INDEX_FILE]),
            Self::Root(_) => CacheKey::from_parts([INDEX_FILE]),
        }
    }

    /// How long cached content stays servable.  Files under any tag other
    /// than `main` are treated as immutable.
    pub fn freshness_window(&self, config: &FreshnessConfig) -> Window {
        match self {
            Self::File(f) if f.tag == DEFAULT_TAG => Window::Bounded(config.main_file_window()),
            Self::File(_) | Self::Root(_) => Window::Infinite,
            Self::Repo(_) | Self::User(_) => Window::Bounded(config.listing_window()),
        }
    }

    /// Upstream endpoints in the order they are tried.  A later target is
    /// only used when the previous one answered 404.
    pub fn upstream_targets(&self, per_page: u32) -> Vec<UpstreamTarget> {
        match self {
            Self::File(f) => vec![UpstreamTarget::Raw(f.raw_path())],
            Self::Repo(r) => vec![UpstreamTarget::Api(format!(
                "/repos/{}/{}/releases?per_page={per_page}",
                r.owner, r.repo
            ))],
            Self::User(u) => vec![
                UpstreamTarget::Api(format!("/orgs/{}/repos?per_page={per_page}", u.owner)),
                UpstreamTarget::Api(format!("/users/{}/repos?per_page={per_page}", u.owner)),
            ],
            Self::Root(r) => vec![UpstreamTarget::Api(format!(
                "/orgs/{}/repos?per_page={per_page}",
                r.org
            ))],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
