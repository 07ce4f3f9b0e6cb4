//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build providers → Start them → Compile first generation
//!     → Spawn aggregator + rebuild loop (+ admin) → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop providers → Stop accepting → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Force a rebuild
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then routes, then listeners
//! - Shutdown has a timeout: in-flight requests are cut off after the grace

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_providers, run, Proxy, StartupError, STATIC_PROVIDER};
