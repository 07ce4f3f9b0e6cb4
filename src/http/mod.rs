//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → switchboard admission (pin one generation)
//!     → route table lookup
//!     → middleware/ (per-route interceptor chain)
//!     → server pool picks an endpoint
//!     → request.rs (upstream URI) / response.rs (header hygiene)
//!     → body.rs (response body pinned to its generation)
//!     → Send to client
//! ```

pub mod body;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
