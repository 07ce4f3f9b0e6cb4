//! Service discovery providers.
//!
//! # Data Flow
//! ```text
//! Provider (memory.rs, file.rs, ...)
//!     → start(stop) returns a stream of ProviderEvent
//!     → aggregator.rs (merge N streams, debounce, coalesce)
//!     → RebuildTrigger
//!     → rebuild loop reads current_state() of every live provider
//! ```
//!
//! # Design Decisions
//! - Events carry no payload; state is always read fresh at compile time
//! - A provider is one capability (start + current state), not a base type
//! - A closed event stream means the provider is gone for good

pub mod aggregator;
pub mod descriptor;
pub mod file;
pub mod memory;

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub use aggregator::{Aggregator, EventSink, ProviderRegistry, ProviderState, ProviderStatus, RebuildTrigger};
pub use descriptor::{split_and_trim, EndpointSpec, MiddlewareDirective, ProviderEvent, RawServiceDescriptor};
pub use file::FileProvider;
pub use memory::MemoryProvider;

/// Capacity of a provider's event stream. Events are pure signals, so a
/// full stream already guarantees a rebuild.
pub const EVENT_BUFFER: usize = 16;

/// Errors raised by providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0} has already been started")]
    AlreadyStarted(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A source of service descriptors.
pub trait Provider: Send + Sync {
    /// Stable identifier, used to qualify route names.
    fn id(&self) -> &str;

    /// Start observing the source. Events are pushed on the returned stream
    /// until `stop` fires; the stream then closes.
    fn start(&self, stop: broadcast::Receiver<()>) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError>;

    /// Descriptors currently known to the provider.
    fn current_state(&self) -> Vec<RawServiceDescriptor>;
}

/// Descriptors of one provider at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub provider: String,
    pub descriptors: Vec<RawServiceDescriptor>,
}
