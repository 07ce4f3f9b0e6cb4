//! TCP listener binding.
//!
//! The listener is bound before anything is served so that address errors
//! surface at startup, and so tests can bind port 0 and learn the address.

use std::net::{SocketAddr, TcpListener};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}")]
    Address { address: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Bind a non-blocking TCP listener on `address`.
pub fn bind(address: &str) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = address.parse().map_err(|_| ListenerError::Address {
        address: address.to_string(),
    })?;
    let listener = TcpListener::bind(addr).map_err(|source| ListenerError::Bind { address: addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ListenerError::Bind { address: addr, source })?;

    tracing::info!(address = %listener.local_addr().unwrap_or(addr), "Listener bound");
    Ok(listener)
}
