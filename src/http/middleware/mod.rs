//! Per-route request interceptors.
//!
//! # Data Flow
//! ```text
//! Matched RouteEntry
//!     → chain.rs (run interceptors in compiled order)
//!         → ip_allow_list.rs (403 unless peer is inside a network)
//!         → strip_prefix.rs (rewrite path, 404 when no prefix matches)
//!     → terminal handler (forward to the selected endpoint)
//! ```
//!
//! # Design Decisions
//! - Interceptors are synchronous; only the terminal handler awaits
//! - Any interceptor may answer the request; later stages are then skipped

pub mod chain;
pub mod ip_allow_list;
pub mod strip_prefix;

pub use chain::{Chain, Flow, Interceptor};
pub use ip_allow_list::{AllowListError, IpAllowList};
pub use strip_prefix::{StripPrefix, X_FORWARDED_PREFIX};
