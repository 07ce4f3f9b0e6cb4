//! Path prefix stripping.
//!
//! Prefixes are tried in configured order. A prefix matches when it equals
//! the path, or when the path continues with `/` right after it (a prefix
//! that already ends in `/` only matches sub-paths). The first match is
//! removed from the path and reported to the upstream in
//! `X-Forwarded-Prefix`. A path matching no prefix is answered with 404.

use axum::{
    body::Body,
    http::{uri::PathAndQuery, HeaderValue, Request, StatusCode, Uri},
    response::IntoResponse,
};

use crate::http::middleware::chain::{Flow, Interceptor};

/// Header carrying the stripped prefix to the upstream.
pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";

/// Interceptor removing a configured prefix from the request path.
#[derive(Debug, Clone)]
pub struct StripPrefix {
    prefixes: Vec<String>,
}

impl StripPrefix {
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> Self {
        Self {
            prefixes: prefixes.iter().map(|p| p.as_ref().trim().to_string()).collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Returns `(matched prefix, remaining path)` for the first matching prefix.
    pub fn strip<'a>(&'a self, path: &str) -> Option<(&'a str, String)> {
        for prefix in &self.prefixes {
            if prefix == path {
                return Some((prefix, "/".to_string()));
            }

            let rest = if prefix.ends_with('/') {
                path.strip_prefix(prefix.as_str())
            } else {
                path.strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
            };

            if let Some(rest) = rest {
                let rest = rest.trim_start_matches('/');
                return Some((prefix, format!("/{rest}")));
            }
        }
        None
    }
}

fn rewrite_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

impl Interceptor for StripPrefix {
    fn name(&self) -> &'static str {
        "strip-prefix"
    }

    fn intercept(&self, req: &mut Request<Body>) -> Flow {
        let Some((prefix, path)) = self.strip(req.uri().path()) else {
            tracing::debug!(path = %req.uri().path(), "No strip prefix matched");
            return Flow::Respond((StatusCode::NOT_FOUND, "404 page not found\n").into_response());
        };

        let (Some(uri), Ok(header)) = (rewrite_path(req.uri(), &path), HeaderValue::from_str(prefix)) else {
            return Flow::Respond(StatusCode::BAD_REQUEST.into_response());
        };

        tracing::debug!(prefix, from = %req.uri().path(), to = %path, "Stripped path prefix");
        *req.uri_mut() = uri;
        req.headers_mut().insert(X_FORWARDED_PREFIX, header);
        Flow::Continue
    }
}
