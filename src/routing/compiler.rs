//! Configuration compiler.
//!
//! # Responsibilities
//! - Turn a snapshot of every provider's descriptors into a route table
//! - Validate rules, endpoints and middleware directives per fragment
//! - Reuse equivalent pools from the prior generation
//! - Order entries deterministically
//!
//! # Design Decisions
//! - A bad fragment is skipped and reported, never fatal to the build
//! - The prior table is only read; pools are shared by `Arc`, so balancing
//!   and affinity state carry over without copying
//! - Order: priority (desc), specificity (desc), name (asc)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::http::middleware::{AllowListError, Chain, Interceptor, IpAllowList, StripPrefix};
use crate::load_balancer::{Endpoint, ServerPool, StickySession, DEFAULT_WEIGHT};
use crate::provider::{split_and_trim, MiddlewareDirective, ProviderSnapshot, RawServiceDescriptor};
use crate::routing::matcher::{MatchRule, RuleError};
use crate::routing::table::{RouteEntry, RouteTable};

/// Middleware kind restricting clients to a set of networks.
pub const IP_ALLOW_LIST: &str = "ip-allow-list";
/// Middleware kind removing a path prefix.
pub const STRIP_PREFIX: &str = "strip-prefix";

const SOURCE_RANGE: &str = "source-range";
const PREFIXES: &str = "prefixes";

/// Why one descriptor was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("service name is empty")]
    EmptyName,

    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("invalid endpoint {address:?}: {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("unknown middleware kind {0:?}")]
    UnknownMiddleware(String),

    #[error("middleware {kind} does not accept option {option:?}")]
    UnknownOption { kind: String, option: String },

    #[error("middleware {kind} requires option {option:?}")]
    MissingOption { kind: String, option: String },

    #[error("invalid allow list: {0}")]
    AllowList(#[from] AllowListError),

    #[error("route {0} is declared more than once")]
    DuplicateRoute(String),
}

/// A rejected fragment, with where it came from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{provider}/{fragment}: {error}")]
pub struct FragmentError {
    pub provider: String,
    pub fragment: String,
    #[source]
    pub error: CompileError,
}

/// Result of one compilation.
#[derive(Debug)]
pub struct Compilation {
    pub table: RouteTable,
    pub errors: Vec<FragmentError>,
}

type PoolKey = (Vec<(String, u32)>, Option<String>);

/// Compile `snapshots` into the table for `generation`.
pub fn compile(snapshots: &[ProviderSnapshot], prior: Option<&RouteTable>, generation: u64) -> Compilation {
    let mut reusable = reusable_pools(prior);
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    for snapshot in snapshots {
        for descriptor in &snapshot.descriptors {
            let name = format!("{}@{}", descriptor.name.trim(), snapshot.provider);
            let result = if seen.insert(name.clone()) {
                compile_entry(name, descriptor, &mut reusable)
            } else {
                Err(CompileError::DuplicateRoute(name))
            };

            match result {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    tracing::warn!(
                        provider = %snapshot.provider,
                        fragment = %descriptor.name,
                        error = %error,
                        "Skipping invalid service"
                    );
                    errors.push(FragmentError {
                        provider: snapshot.provider.clone(),
                        fragment: descriptor.name.clone(),
                        error,
                    });
                }
            }
        }
    }

    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.rule.specificity().cmp(&a.rule.specificity()))
            .then_with(|| a.name.cmp(&b.name))
    });

    Compilation {
        table: RouteTable::new(generation, entries),
        errors,
    }
}

fn reusable_pools(prior: Option<&RouteTable>) -> HashMap<PoolKey, Arc<ServerPool>> {
    let mut pools = HashMap::new();
    for entry in prior.map(RouteTable::entries).unwrap_or_default() {
        let cookie = entry.pool.sticky().map(|s| s.cookie_name().to_string());
        pools.entry((entry.pool.signature(), cookie)).or_insert_with(|| Arc::clone(&entry.pool));
    }
    pools
}

fn compile_entry(
    name: String,
    descriptor: &RawServiceDescriptor,
    reusable: &mut HashMap<PoolKey, Arc<ServerPool>>,
) -> Result<RouteEntry, CompileError> {
    if descriptor.name.trim().is_empty() {
        return Err(CompileError::EmptyName);
    }
    let rule = MatchRule::parse(&descriptor.rule)?;
    let chain = build_chain(&descriptor.middlewares)?;

    let endpoints = descriptor
        .endpoints
        .iter()
        .map(|spec| {
            let url = parse_endpoint(&spec.address)?;
            let weight = if spec.weight == 0 { DEFAULT_WEIGHT } else { spec.weight };
            Ok(Endpoint::new(url, weight))
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    let cookie = descriptor
        .affinity_cookie
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let key: PoolKey = (
        endpoints.iter().map(|e| (e.address().to_string(), e.weight)).collect(),
        cookie.clone(),
    );
    // each prior pool backs at most one route of the new generation
    let pool = match reusable.remove(&key) {
        Some(pool) => {
            tracing::debug!(route = %name, "Reusing pool from previous generation");
            pool
        }
        None => Arc::new(ServerPool::new(endpoints, cookie.map(StickySession::new))),
    };

    Ok(RouteEntry {
        name,
        rule,
        chain,
        pool,
        priority: descriptor.priority,
    })
}

fn parse_endpoint(address: &str) -> Result<Url, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidEndpoint {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(address.trim()).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid("only http endpoints are supported"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

fn build_chain(directives: &[MiddlewareDirective]) -> Result<Chain, CompileError> {
    let mut interceptors: Vec<Box<dyn Interceptor>> = Vec::with_capacity(directives.len());
    for directive in directives {
        let kind = directive.kind.trim();
        let interceptor: Box<dyn Interceptor> = match kind {
            IP_ALLOW_LIST => {
                let ranges = split_and_trim(required_option(directive, kind, SOURCE_RANGE)?);
                Box::new(IpAllowList::new(&ranges)?)
            }
            STRIP_PREFIX => {
                let prefixes = split_and_trim(required_option(directive, kind, PREFIXES)?);
                if prefixes.is_empty() {
                    return Err(CompileError::MissingOption {
                        kind: kind.to_string(),
                        option: PREFIXES.to_string(),
                    });
                }
                Box::new(StripPrefix::new(&prefixes))
            }
            other => return Err(CompileError::UnknownMiddleware(other.to_string())),
        };
        interceptors.push(interceptor);
    }
    Ok(Chain::new(interceptors))
}

/// Return the only allowed option of `directive`.
fn required_option<'a>(directive: &'a MiddlewareDirective, kind: &str, option: &str) -> Result<&'a str, CompileError> {
    if let Some(unknown) = directive.options.keys().find(|k| k.as_str() != option) {
        return Err(CompileError::UnknownOption {
            kind: kind.to_string(),
            option: unknown.clone(),
        });
    }
    directive
        .options
        .get(option)
        .map(String::as_str)
        .ok_or_else(|| CompileError::MissingOption {
            kind: kind.to_string(),
            option: option.to_string(),
        })
}
