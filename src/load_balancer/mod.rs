//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → entry's ServerPool
//!     → sticky.rs (affinity cookie names a live endpoint? use it)
//!     → round_robin.rs (otherwise GCD-interleaved weighted selection)
//!     → endpoint.rs (track in-flight request)
//!     → Return Selection (endpoint + optional Set-Cookie) or SelectError
//! ```
//!
//! # Design Decisions
//! - Pools are built by the compiler and owned by one route table generation
//! - Equivalent pools are carried into the next generation with their cursor
//! - Selection state is the only mutable state on the hot path

pub mod endpoint;
pub mod pool;
pub mod round_robin;
pub mod sticky;

pub use endpoint::{Endpoint, EndpointGuard, DEFAULT_WEIGHT};
pub use pool::{PoolError, Selection, ServerPool};
pub use round_robin::{SelectError, WeightedRoundRobin};
pub use sticky::StickySession;
