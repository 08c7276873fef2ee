//! Request path resolution.
//!
//! Maps `/{owner}/{repo}@{tag}/{file...}` request paths onto one of the four
//! resource kinds.  Precedence: a file segment selects [`Resolution::File`],
//! then a repo segment selects [`Resolution::Repo`], then an owner selects
//! [`Resolution::User`], and an empty path is [`Resolution::Root`].

use std::sync::LazyLock;

use regex::Regex;

use crate::cache::INDEX_FILE;

/// Marker character introducing a tag suffix on the repo segment.
pub const TAG_MARKER: char = '@';

/// Tag used when the request names none.
pub const DEFAULT_TAG: &str = "main";

static SEMVER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v[0-9]+\.[0-9]+\.[0-9]+").expect("semver tag pattern is valid")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw path segments, before classification.  `tag` keeps its marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPath {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub file: Option<String>,
}

/// Coarse request kind, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Root,
    User,
    Repo,
    File,
    NotFound,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::User => "user",
            Self::Repo => "repo",
            Self::File => "file",
            Self::NotFound => "not_found",
        }
    }
}

/// A classified request.  File requests carry the normalized tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Root,
    User {
        owner: String,
    },
    Repo {
        owner: String,
        repo: String,
    },
    File {
        owner: String,
        repo: String,
        tag: String,
        file: String,
    },
    NotFound,
}

impl Resolution {
    pub fn classification(&self) -> Classification {
        match self {
            Self::Root => Classification::Root,
            Self::User { .. } => Classification::User,
            Self::Repo { .. } => Classification::Repo,
            Self::File { .. } => Classification::File,
            Self::NotFound => Classification::NotFound,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl ParsedPath {
    /// Split a request path into its segments.  The query string and
    /// fragment are discarded.  Returns `None` for paths that are not
    /// absolute.
    pub fn parse(request_path: &str) -> Option<Self> {
        let path = request_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let rest = path.strip_prefix('/')?;

        let mut segments = rest.splitn(3, '/');
        let owner = segments.next().filter(|s| !s.is_empty());
        let (repo, tag) = match segments.next().filter(|s| !s.is_empty()) {
            Some(segment) => match segment.find(TAG_MARKER) {
                Some(idx) => (Some(&segment[..idx]), Some(&segment[idx..])),
                None => (Some(segment), None),
            },
            None => (None, None),
        };
        let file = segments.next().filter(|s| !s.is_empty());

        Some(Self {
            owner: owner.map(str::to_string),
            repo: repo.filter(|r| !r.is_empty()).map(str::to_string),
            tag: tag.map(str::to_string),
            file: file.map(str::to_string),
        })
    }

    /// Classify the parsed segments.  A deeper segment without the
    /// shallower one (e.g. `//repo`) is not a valid path.
    pub fn classify(self) -> Resolution {
        let Self {
            owner,
            repo,
            tag,
            file,
        } = self;

        let Some(owner) = owner else {
            if repo.is_some() || tag.is_some() || file.is_some() {
                return Resolution::NotFound;
            }
            return Resolution::Root;
        };
        if !is_safe_segment(&owner) || is_listing_segment(&owner) {
            return Resolution::NotFound;
        }

        let Some(repo) = repo else {
            if tag.is_some() || file.is_some() {
                return Resolution::NotFound;
            }
            return Resolution::User { owner };
        };
        if !is_safe_segment(&repo) || is_listing_segment(&repo) {
            return Resolution::NotFound;
        }

        let Some(file) = file else {
            return Resolution::Repo { owner, repo };
        };

        let tag = normalize_tag(tag.as_deref());
        if !is_safe_segment(&tag)
            || is_listing_segment(&tag)
            || !file.split('/').all(is_safe_segment)
        {
            return Resolution::NotFound;
        }

        Resolution::File {
            owner,
            repo,
            tag,
            file,
        }
    }
}

/// Resolve a request path (optionally carrying a query string).
pub fn resolve(request_path: &str) -> Resolution {
    match ParsedPath::parse(request_path) {
        Some(parsed) => parsed.classify(),
        None => Resolution::NotFound,
    }
}

/// Normalize a raw tag: strip the marker, default to `main`, and prefix
/// version numbers with `v` (`1.2.3` becomes `v1.2.3`).
pub fn normalize_tag(raw: Option<&str>) -> String {
    let tag = raw.unwrap_or_default().trim_start_matches(TAG_MARKER);
    if tag.is_empty() {
        DEFAULT_TAG.to_string()
    } else if tag.starts_with(|c: char| c.is_ascii_digit()) {
        format!("v{tag}")
    } else {
        tag.to_string()
    }
}

/// Whether a normalized tag looks like `v<major>.<minor>.<patch>...`.
pub fn is_semver_tag(tag: &str) -> bool {
    SEMVER_TAG.is_match(tag)
}

/// Rejects segments that would escape or alias a cache directory.  Dots may
/// arrive percent-encoded (`%2e%2e`), which the upstream URL parser treats
/// as a dot segment.
fn is_safe_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    !segment.is_empty()
        && decoded != "."
        && decoded != ".."
        && !segment.contains(['\0', '\\'])
}

/// Owner, repo and tag directories share their parent with a listing file;
/// a segment named after it would collide.
fn is_listing_segment(segment: &str) -> bool {
    segment == INDEX_FILE
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
