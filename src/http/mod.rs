//! HTTP layer of the CDN.
//!
//! A single fallback handler serves every CDN path; `/healthz`, `/metrics`
//! and `/favicon.ico` are answered before path resolution.

pub mod handler;
