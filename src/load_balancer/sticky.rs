//! Cookie-based session affinity.
//!
//! The affinity cookie stores the literal address of the endpoint that
//! served the first request. A cookie naming an endpoint that left the pool
//! is ignored, so clients heal onto a new endpoint on their next request.

use axum::http::{header, HeaderMap, HeaderValue};
use cookie::Cookie;
use url::Url;

use crate::load_balancer::endpoint::same_url;

/// Affinity settings attached to one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickySession {
    cookie_name: String,
}

impl StickySession {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Return the index of the endpoint named by the affinity cookie, if the
    /// cookie is present and that endpoint is still part of `endpoints`.
    pub fn lookup<'a, I>(&self, headers: &HeaderMap, endpoints: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a Url>,
    {
        let value = self.cookie_value(headers)?;
        let wanted = match Url::parse(&value) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!(cookie = %self.cookie_name, value = %value, error = %e, "Ignoring unparseable affinity cookie");
                return None;
            }
        };
        endpoints.into_iter().position(|u| same_url(u, &wanted))
    }

    /// Build the `Set-Cookie` value pinning the client to `endpoint`.
    pub fn cookie_for(&self, endpoint: &Url) -> Option<HeaderValue> {
        let cookie = Cookie::build((self.cookie_name.as_str(), endpoint.as_str()))
            .path("/")
            .build();
        HeaderValue::from_str(&cookie.to_string()).ok()
    }

    fn cookie_value(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| Cookie::split_parse(v).filter_map(Result::ok))
            .find(|cookie| cookie.name() == self.cookie_name)
            .map(|cookie| cookie.value_trimmed().to_string())
    }
}
