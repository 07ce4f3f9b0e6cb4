//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request path, rebuild loop, aggregator, switchboard
//!     → logging.rs (tracing subscriber, env-filtered fmt output)
//!     → metrics.rs (request, rebuild and generation metrics)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape listener (when enabled)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event, never formatted strings only
//! - Request ID flows from the edge to the upstream
//! - Metrics go through the `metrics` facade; without an installed
//!   recorder they are no-ops

pub mod logging;
pub mod metrics;
