//! Source address allow-list.
//!
//! # Responsibilities
//! - Parse CIDR literals (IPv4 and IPv6) at construction time
//! - Reject requests whose transport-level source is outside every network
//!
//! # Design Decisions
//! - Only the peer address of the connection is trusted; forwarding headers
//!   such as `X-Forwarded-For` are ignored
//! - IPv4-mapped IPv6 peers are compared as IPv4
//! - A request without a usable source address is rejected

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::IntoResponse,
};
use ipnet::IpNet;
use thiserror::Error;

use crate::http::middleware::chain::{Flow, Interceptor};

/// Errors raised while building or applying an allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowListError {
    #[error("no allow-lists provided")]
    NoAllowListsProvided,

    #[error("invalid network literal {0:?}")]
    InvalidNetworkLiteral(String),

    #[error("malformed source address {0:?}")]
    MalformedSourceAddress(String),
}

/// Interceptor admitting only callers inside the configured networks.
#[derive(Debug, Clone)]
pub struct IpAllowList {
    networks: Vec<IpNet>,
}

impl IpAllowList {
    /// Build an allow-list from CIDR literals such as `10.0.0.0/8` or `fe80::/16`.
    pub fn new<S: AsRef<str>>(literals: &[S]) -> Result<Self, AllowListError> {
        if literals.is_empty() {
            return Err(AllowListError::NoAllowListsProvided);
        }

        let networks = literals
            .iter()
            .map(|literal| {
                let literal = literal.as_ref();
                IpNet::from_str(literal.trim())
                    .map(|net| net.trunc())
                    .map_err(|_| AllowListError::InvalidNetworkLiteral(literal.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { networks })
    }

    pub fn networks(&self) -> &[IpNet] {
        &self.networks
    }

    /// Returns the first network containing `ip`, if any.
    pub fn matching(&self, ip: IpAddr) -> Option<&IpNet> {
        let ip = ip.to_canonical();
        self.networks.iter().find(|net| net.contains(&ip))
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.matching(ip).is_some()
    }
}

/// Extract the caller's IP from the connection info attached by the listener.
pub fn source_ip(req: &Request<Body>) -> Result<IpAddr, AllowListError> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .ok_or_else(|| AllowListError::MalformedSourceAddress("<missing>".to_string()))
}

fn reject() -> Flow {
    let status = StatusCode::FORBIDDEN;
    let body = format!("{} {}\n", status.as_u16(), status.canonical_reason().unwrap_or("Forbidden"));
    Flow::Respond((status, body).into_response())
}

impl Interceptor for IpAllowList {
    fn name(&self) -> &'static str {
        "ip-allow-list"
    }

    fn intercept(&self, req: &mut Request<Body>) -> Flow {
        let ip = match source_ip(req) {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to determine source address, rejecting");
                return reject();
            }
        };

        match self.matching(ip) {
            Some(net) => {
                tracing::debug!(source = %ip, network = %net, "Source matched allow-list, passing");
                Flow::Continue
            }
            None => {
                tracing::debug!(source = %ip, networks = self.networks.len(), "Source matched no allow-list, rejecting");
                reject()
            }
        }
    }
}
