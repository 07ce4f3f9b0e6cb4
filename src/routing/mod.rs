//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Provider snapshots (RawServiceDescriptor[] per provider)
//!     → compiler.rs (validate, build chains, reuse pools, sort)
//!     → table.rs (immutable RouteTable for one generation)
//!
//! Incoming Request (host, path)
//!     → table.rs (first matching entry)
//!     → matcher.rs (evaluate rule predicates)
//!     → RouteEntry or no match
//! ```
//!
//! # Design Decisions
//! - Tables are compiled off the hot path and frozen
//! - No regex in the hot path (literal host and prefix matching only)
//! - Deterministic: same snapshot always yields the same order

pub mod compiler;
pub mod matcher;
pub mod table;

pub use compiler::{compile, Compilation, CompileError, FragmentError, IP_ALLOW_LIST, STRIP_PREFIX};
pub use matcher::{MatchRule, Predicate, RuleError};
pub use table::{RouteEntry, RouteTable};
