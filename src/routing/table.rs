//! Immutable route table.
//!
//! # Responsibilities
//! - Hold the ordered entries of one configuration generation
//! - Return the first entry whose rule matches a request
//!
//! # Design Decisions
//! - Never mutated after construction; a new generation is a new table
//! - Entries are already sorted by the compiler, so lookup is a linear scan
//!   and the first match wins
//! - Pools are shared through `Arc` so unchanged pools survive a rebuild

use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::http::Request;

use crate::http::middleware::Chain;
use crate::load_balancer::ServerPool;
use crate::routing::matcher::MatchRule;

/// One compiled route.
#[derive(Debug)]
pub struct RouteEntry {
    /// Qualified name (`name@provider`).
    pub name: String,
    pub rule: MatchRule,
    pub chain: Chain,
    pub pool: Arc<ServerPool>,
    pub priority: i32,
}

/// An immutable, ordered set of routes for one generation.
#[derive(Debug)]
pub struct RouteTable {
    generation: u64,
    entries: Vec<RouteEntry>,
    built_at: SystemTime,
}

impl RouteTable {
    /// Create a table. `entries` must already be in lookup order.
    pub fn new(generation: u64, entries: Vec<RouteEntry>) -> Self {
        Self {
            generation,
            entries,
            built_at: SystemTime::now(),
        }
    }

    /// A table with no routes.
    pub fn empty(generation: u64) -> Self {
        Self::new(generation, Vec::new())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// First entry whose rule matches the request.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.rule.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, rule: &str) -> RouteEntry {
        RouteEntry {
            name: name.to_string(),
            rule: MatchRule::parse(rule).unwrap(),
            chain: Chain::default(),
            pool: Arc::new(ServerPool::new(vec![], None)),
            priority: 0,
        }
    }

    fn req(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("Host", "example.com")
            .body(Body::default())
            .unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::new(
            1,
            vec![entry("api@test", "PathPrefix:/api"), entry("root@test", "PathPrefix:/")],
        );
        assert_eq!(table.match_request(&req("/api/users")).unwrap().name, "api@test");
        assert_eq!(table.match_request(&req("/index.html")).unwrap().name, "root@test");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new(3, vec![entry("api@test", "PathPrefix:/api")]);
        assert!(table.match_request(&req("/other")).is_none());
        assert!(RouteTable::empty(4).match_request(&req("/")).is_none());
        assert_eq!(table.generation(), 3);
        assert!(table.get("api@test").is_some());
    }
}
