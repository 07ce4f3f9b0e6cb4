//! Server pool management.
//!
//! # Responsibilities
//! - Own the ordered endpoints of one backend cluster
//! - Select the next endpoint (affinity first, then weighted round-robin)
//! - Apply membership changes and reset the selection cursor
//!
//! # Design Decisions
//! - One mutex per pool around the selection step; the lock is never held
//!   across an await point
//! - Membership changes replace the endpoint sequence instead of editing it
//!   under readers' feet

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::{HeaderMap, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::load_balancer::{
    endpoint::{Endpoint, DEFAULT_WEIGHT},
    round_robin::{SelectError, WeightedRoundRobin},
    sticky::StickySession,
};

/// Errors returned by pool membership operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("endpoint {0} is not part of the pool")]
    NotFound(String),
}

/// Outcome of a selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The endpoint that should serve the request.
    pub endpoint: Arc<Endpoint>,
    /// True when the endpoint came from a valid affinity cookie.
    pub stuck: bool,
    /// `Set-Cookie` value to attach to the response, if any.
    pub set_cookie: Option<HeaderValue>,
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<Arc<Endpoint>>,
    rr: WeightedRoundRobin,
}

/// One backend cluster: weighted endpoints plus optional affinity.
#[derive(Debug)]
pub struct ServerPool {
    state: Mutex<PoolState>,
    sticky: Option<StickySession>,
}

impl ServerPool {
    /// Create a pool over the given endpoints.
    pub fn new(endpoints: Vec<Endpoint>, sticky: Option<StickySession>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                endpoints: endpoints.into_iter().map(Arc::new).collect(),
                rr: WeightedRoundRobin::new(),
            }),
            sticky,
        }
    }

    pub fn sticky(&self) -> Option<&StickySession> {
        self.sticky.as_ref()
    }

    /// Snapshot of the current endpoints in order.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.lock().endpoints.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select the endpoint for a request with the given headers.
    pub fn next_endpoint(&self, headers: &HeaderMap) -> Result<Selection, SelectError> {
        let mut state = self.lock();

        if let Some(sticky) = &self.sticky {
            if let Some(i) = sticky.lookup(headers, state.endpoints.iter().map(|e| &e.url)) {
                return Ok(Selection {
                    endpoint: Arc::clone(&state.endpoints[i]),
                    stuck: true,
                    set_cookie: None,
                });
            }
        }

        let weights: Vec<u32> = state.endpoints.iter().map(|e| e.weight).collect();
        let index = state.rr.next(&weights)?;
        let endpoint = Arc::clone(&state.endpoints[index]);
        let set_cookie = self.sticky.as_ref().and_then(|s| s.cookie_for(&endpoint.url));

        Ok(Selection {
            endpoint,
            stuck: false,
            set_cookie,
        })
    }

    /// Add an endpoint, or update the weight of an existing one.
    /// A weight of zero is normalized to the default weight.
    pub fn upsert_endpoint(&self, url: Url, weight: u32) {
        let weight = if weight == 0 { DEFAULT_WEIGHT } else { weight };
        let mut state = self.lock();
        let mut endpoints: Vec<Arc<Endpoint>> = state.endpoints.clone();
        match endpoints.iter().position(|e| e.same_address(&url)) {
            Some(i) => endpoints[i] = Arc::new(Endpoint::new(url, weight)),
            None => endpoints.push(Arc::new(Endpoint::new(url, weight))),
        }
        state.endpoints = endpoints;
        state.rr.reset();
    }

    /// Remove the endpoint with the given address.
    pub fn remove_endpoint(&self, url: &Url) -> Result<(), PoolError> {
        let mut state = self.lock();
        let before = state.endpoints.len();
        let endpoints: Vec<Arc<Endpoint>> = state
            .endpoints
            .iter()
            .filter(|e| !e.same_address(url))
            .cloned()
            .collect();
        if endpoints.len() == before {
            return Err(PoolError::NotFound(url.to_string()));
        }
        state.endpoints = endpoints;
        state.rr.reset();
        Ok(())
    }

    /// Weighted (address, weight) view, used to detect equivalent pools.
    pub fn signature(&self) -> Vec<(String, u32)> {
        self.lock()
            .endpoints
            .iter()
            .map(|e| (e.address().to_string(), e.weight))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
