//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Rewrite the request URI to target the selected endpoint
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The endpoint's own path, if any, is prepended to the request path

use axum::http::{HeaderMap, HeaderValue, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a v4 UUID for requests that arrive without an id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request id of a request, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Build the URI of the upstream request for `endpoint`.
pub fn upstream_uri(endpoint: &Url, original: &Uri) -> Option<Uri> {
    let host = endpoint.host_str()?;
    let authority = match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let base = endpoint.path().trim_end_matches('/');
    let path_and_query = match original.query() {
        Some(query) => format!("{base}{}?{query}", original.path()),
        None => format!("{base}{}", original.path()),
    };

    Uri::builder()
        .scheme(endpoint.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .ok()
}
