//! Route match rules.
//!
//! # Responsibilities
//! - Parse rule text (`Host:a.com,b.com;PathPrefix:/api;Path:/exact`)
//! - Evaluate a parsed rule against a request
//! - Compute the rule's specificity used to order the route table
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive
//! - Predicates combine with AND; values inside one predicate with OR
//! - No regex, so matching stays linear in the number of literals

use axum::body::Body;
use axum::http::{header, Request};
use thiserror::Error;

/// Errors raised while parsing a rule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule is empty")]
    Empty,

    #[error("malformed predicate {0:?}, expected Kind:value[,value]")]
    Malformed(String),

    #[error("unknown predicate {0:?}")]
    UnknownPredicate(String),

    #[error("predicate {0} has no values")]
    NoValues(String),

    #[error("path {0:?} must start with '/'")]
    InvalidPath(String),
}

/// One parsed predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Lowercased host names.
    Host(Vec<String>),
    PathPrefix(Vec<String>),
    Path(Vec<String>),
}

impl Predicate {
    fn matches(&self, host: Option<&str>, path: &str) -> bool {
        match self {
            Predicate::Host(hosts) => host.is_some_and(|h| hosts.iter().any(|e| e.eq_ignore_ascii_case(h))),
            Predicate::PathPrefix(prefixes) => prefixes.iter().any(|p| path.starts_with(p.as_str())),
            Predicate::Path(paths) => paths.iter().any(|p| p == path),
        }
    }
}

/// A parsed, immutable match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    source: String,
    predicates: Vec<Predicate>,
}

impl MatchRule {
    /// Parse rule text.
    pub fn parse(rule: &str) -> Result<Self, RuleError> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RuleError::Empty);
        }

        let mut predicates = Vec::new();
        for part in rule.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (kind, values) = part
                .split_once(':')
                .ok_or_else(|| RuleError::Malformed(part.to_string()))?;
            let kind = kind.trim();
            let values: Vec<String> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(RuleError::NoValues(kind.to_string()));
            }

            let predicate = match kind {
                "Host" => Predicate::Host(values.into_iter().map(|v| v.to_ascii_lowercase()).collect()),
                "PathPrefix" | "Path" => {
                    if let Some(bad) = values.iter().find(|v| !v.starts_with('/')) {
                        return Err(RuleError::InvalidPath(bad.clone()));
                    }
                    if kind == "Path" {
                        Predicate::Path(values)
                    } else {
                        Predicate::PathPrefix(values)
                    }
                }
                other => return Err(RuleError::UnknownPredicate(other.to_string())),
            };
            predicates.push(predicate);
        }

        if predicates.is_empty() {
            return Err(RuleError::Empty);
        }
        Ok(Self {
            source: rule.to_string(),
            predicates,
        })
    }

    /// The rule text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Returns true if every predicate accepts the request.
    pub fn matches(&self, req: &Request<Body>) -> bool {
        let host = request_host(req);
        let path = req.uri().path();
        self.predicates.iter().all(|p| p.matches(host, path))
    }

    /// Longest host literal plus longest path literal, plus one when the
    /// path must match exactly.
    pub fn specificity(&self) -> usize {
        let mut host = 0;
        let mut path = 0;
        let mut exact = 0;
        for predicate in &self.predicates {
            match predicate {
                Predicate::Host(hosts) => host = host.max(longest(hosts)),
                Predicate::PathPrefix(paths) => path = path.max(longest(paths)),
                Predicate::Path(paths) => {
                    path = path.max(longest(paths));
                    exact = 1;
                }
            }
        }
        host + path + exact
    }
}

fn longest(values: &[String]) -> usize {
    values.iter().map(String::len).max().unwrap_or(0)
}

/// Host of the request without the port, from the `Host` header or the URI.
fn request_host(req: &Request<Body>) -> Option<&str> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())?;
    Some(strip_port(raw))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
