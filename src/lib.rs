//! Dynamic reverse proxy library.
//!
//! Routes are discovered by providers, compiled into immutable route table
//! generations, and swapped in atomically while the previous generation
//! drains.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod provider;
pub mod routing;
pub mod switchboard;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Proxy, Shutdown};
pub use switchboard::Switchboard;
