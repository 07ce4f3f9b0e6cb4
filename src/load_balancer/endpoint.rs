//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream address inside one pool
//! - Carry the configured weight used by weighted round-robin
//! - Track in-flight requests (reported by the admin API)
//!
//! # Design Decisions
//! - Endpoints are assumed alive; there is no health state to consult
//! - An endpoint belongs to exactly one pool and is never shared
//! - Identity is scheme + host + port + path, matching what the affinity
//!   cookie can express

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// Weight assigned to endpoints that report a weight of zero.
pub const DEFAULT_WEIGHT: u32 = 1;

/// A single backend endpoint.
#[derive(Debug)]
pub struct Endpoint {
    /// Absolute URL of the endpoint (e.g. `http://10.0.0.1:8080`).
    pub url: Url,
    /// Relative weight against the other endpoints of the pool.
    pub weight: u32,
    active_requests: AtomicUsize,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(url: Url, weight: u32) -> Self {
        Self {
            url,
            weight,
            active_requests: AtomicUsize::new(0),
        }
    }

    /// Address text used in logs and as the affinity cookie value.
    pub fn address(&self) -> &str {
        self.url.as_str()
    }

    /// Returns true if `other` designates the same upstream as this endpoint.
    pub fn same_address(&self, other: &Url) -> bool {
        same_url(&self.url, other)
    }

    /// Get the current number of in-flight requests.
    pub fn active(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Register an in-flight request. The count drops with the guard.
    pub fn track(self: &Arc<Self>) -> EndpointGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        EndpointGuard {
            endpoint: Arc::clone(self),
        }
    }
}

/// Compare two endpoint URLs on scheme, host, port and path.
pub fn same_url(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path() == b.path()
}

/// A RAII guard that keeps an endpoint's in-flight count up while held.
#[derive(Debug)]
pub struct EndpointGuard {
    endpoint: Arc<Endpoint>,
}

impl Deref for EndpointGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        self.endpoint.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_same_url_ignores_default_port_and_host_case() {
        assert!(same_url(&url("http://Backend.local"), &url("http://backend.local:80/")));
        assert!(!same_url(&url("http://backend.local:8080"), &url("http://backend.local:8081")));
        assert!(!same_url(&url("http://backend.local/a"), &url("http://backend.local/b")));
    }

    #[test]
    fn test_guard_tracks_active_requests() {
        let endpoint = Arc::new(Endpoint::new(url("http://127.0.0.1:3000"), 1));
        let g1 = endpoint.track();
        let g2 = endpoint.track();
        assert_eq!(endpoint.active(), 2);
        drop(g1);
        assert_eq!(g2.active(), 1);
        drop(g2);
        assert_eq!(endpoint.active(), 0);
    }
}
