//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured bind address
//!     → listener.rs (bind, non-blocking std listener)
//!     → tls.rs (optional rustls configuration)
//!     → Hand off to the HTTP server (axum-server)
//! ```
//!
//! # Design Decisions
//! - Binding happens before serving so errors surface at startup
//! - TLS is optional and handled transparently by axum-server

pub mod listener;
pub mod tls;
