//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! Route changes do not go through here: they arrive as provider events
//! and are compiled into new route table generations.
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, FileProviderConfig, LifecycleConfig, ListenerConfig, ObservabilityConfig, ProvidersConfig,
    ProxyConfig, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
