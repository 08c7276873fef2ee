//! Turns cached bytes into HTTP responses.
//!
//! Files are served verbatim.  Listings are served as the cached JSON, or as
//! an HTML table when the request asked for it.

use anyhow::{Context, Result};
use askama::Template;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use chrono::DateTime;
use serde::Deserialize;

use crate::resource::{FileResource, RepoResource, UserResource};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

// ---------------------------------------------------------------------------
// Listing template
// ---------------------------------------------------------------------------

pub struct ListingRow {
    /// HTML view of the row's child resource, if it has one.
    pub href: Option<String>,
    /// First cell is rendered as the link to `href`.
    pub cells: Vec<String>,
}

#[derive(Template)]
#[template(path = "listing.html")]
pub struct ListingPage {
    pub title: String,
    pub heading: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<ListingRow>,
}

// ---------------------------------------------------------------------------
// Upstream JSON shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoSummary {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

pub fn render_file(file: &FileResource, body: Bytes) -> Response {
    let mime = mime_guess::from_path(&file.file).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref());
    if file.immutable {
        builder = builder.header(header::CACHE_CONTROL, HeaderValue::from_static("immutable"));
    }
    builder.body(Body::from(body)).unwrap_or_else(|_| internal())
}

pub fn render_json(body: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Body::from(body))
        .unwrap_or_else(|_| internal())
}

/// Release listing of a repository, one row per release.  A release has no
/// HTML view of its own, so its rows carry no link.
pub fn render_repo_html(repo: &RepoResource, body: &[u8]) -> Result<Response> {
    let releases: Vec<Release> =
        serde_json::from_slice(body).context("cached release listing is not valid JSON")?;

    let rows = releases
        .into_iter()
        .map(|release| ListingRow {
            href: None,
            cells: vec![
                release.tag_name,
                release.name.unwrap_or_default(),
                release
                    .published_at
                    .as_deref()
                    .map(format_date)
                    .unwrap_or_default(),
            ],
        })
        .collect();

    render_page(ListingPage {
        title: format!("{}/{} releases", repo.owner, repo.repo),
        heading: format!("Repository: {}/{}", repo.owner, repo.repo),
        columns: vec!["Tag", "Name", "Published"],
        rows,
    })
}

/// Repository listing of an organization or user.
pub fn render_user_html(user: &UserResource, body: &[u8]) -> Result<Response> {
    let repos: Vec<RepoSummary> =
        serde_json::from_slice(body).context("cached repository listing is not valid JSON")?;

    let rows = repos
        .into_iter()
        .map(|repo| ListingRow {
            href: Some(format!("/{}/{}?html", user.owner, repo.name)),
            cells: vec![
                repo.name,
                repo.description.unwrap_or_default(),
                repo.stargazers_count.to_string(),
            ],
        })
        .collect();

    render_page(ListingPage {
        title: format!("{} repositories", user.owner),
        heading: format!("Organisation: {}", user.owner),
        columns: vec!["Repository", "Description", "Stars"],
        rows,
    })
}

/// Index of every owner that has anything in the cache.
pub fn render_root_html(owners: &[String]) -> Result<Response> {
    let rows = owners
        .iter()
        .map(|owner| ListingRow {
            href: Some(format!("/{owner}?html")),
            cells: vec![owner.clone()],
        })
        .collect();

    render_page(ListingPage {
        title: "Organisations".to_string(),
        heading: "Organisations".to_string(),
        columns: vec!["Organisation"],
        rows,
    })
}

fn render_page(page: ListingPage) -> Result<Response> {
    let html = page.render().context("failed to render listing page")?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HTML_CONTENT_TYPE)
        .body(Body::from(html))
        .context("failed to build listing response")
}

/// `2024-03-01T12:00:00Z` → `2024-03-01`.  Unparseable input is shown as is.
fn format_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn internal() -> Response {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::resolve::{Resolution, resolve};

    async fn body_string(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Every `href` in the page, in document order.
    fn hrefs(html: &str) -> Vec<&str> {
        html.split(r#"href=""#)
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .collect()
    }

    fn file(tag: &str, name: &str) -> FileResource {
        FileResource::new("acme".into(), "w".into(), tag.into(), name.into())
    }

    #[test]
    fn file_content_type_follows_extension() {
        let resp = render_file(&file("main", "dist/app.css"), Bytes::from_static(b"a{}"));
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
        assert!(resp.headers().get(header::CACHE_CONTROL).is_none());

        let resp = render_file(&file("main", "LICENSE"), Bytes::new());
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }

    #[test]
    fn semver_files_are_immutable() {
        let resp = render_file(&file("v1.2.3", "a.js"), Bytes::new());
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "immutable");
    }

    #[tokio::test]
    async fn release_table_has_one_row_per_release() {
        let repo = RepoResource {
            owner: "acme".into(),
            repo: "w".into(),
        };
        let json = br#"[
            {"tag_name":"v2.0.0","name":"Two","published_at":"2024-03-01T12:00:00Z"},
            {"tag_name":"v1.0.0","name":null,"published_at":null}
        ]"#;

        let resp = render_repo_html(&repo, json).unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        let html = body_string(resp).await;

        assert_eq!(html.matches("<tr>").count(), 3);
        assert!(html.contains("<td>v2.0.0</td>"));
        assert!(hrefs(&html).is_empty());
        assert!(html.contains("<td>2024-03-01</td>"));
        assert!(html.contains(r#"name="viewport""#));
    }

    #[tokio::test]
    async fn user_table_escapes_descriptions() {
        let user = UserResource {
            owner: "acme".into(),
        };
        let json = br#"[{"name":"w","description":"<b>bold</b>","stargazers_count":7}]"#;

        let html = body_string(render_user_html(&user, json).unwrap()).await;

        assert_eq!(html.matches("<tr>").count(), 2);
        assert!(html.contains(r#"href="/acme/w?html""#));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&#60;b&#62;bold&#60;/b&#62;"));
        assert!(html.contains("<td>7</td>"));
    }

    #[tokio::test]
    async fn user_rows_link_to_repo_html_view() {
        let user = UserResource {
            owner: "acme".into(),
        };
        let json = br#"[{"name":"w"}]"#;

        let html = body_string(render_user_html(&user, json).unwrap()).await;

        let links = hrefs(&html);
        assert_eq!(links, vec!["/acme/w?html"]);
        let (path, query) = links[0].split_once('?').unwrap();
        assert_eq!(
            resolve(path),
            Resolution::Repo {
                owner: "acme".into(),
                repo: "w".into()
            }
        );
        assert_eq!(query, "html");
    }

    #[test]
    fn invalid_listing_json_is_an_error() {
        let user = UserResource {
            owner: "acme".into(),
        };
        assert!(render_user_html(&user, b"{not json").is_err());
    }

    #[tokio::test]
    async fn root_lists_each_owner() {
        let owners = vec!["acme".to_string(), "nuxodin".to_string()];
        let html = body_string(render_root_html(&owners).unwrap()).await;
        assert_eq!(html.matches("<tr>").count(), 3);
        assert!(html.contains(r#"<a href="/nuxodin?html">nuxodin</a>"#));
        for href in hrefs(&html) {
            let (path, _) = href.split_once('?').unwrap();
            assert!(matches!(resolve(path), Resolution::User { .. }));
        }
    }
}
