//! # Service Host
//!
//! Lifecycle control for supervised `npc` client processes.
//!
//! The host keeps at most one running process per [`ProcessIdentity`], merges
//! the output of every process into a bounded [`LogAggregator`], and tells the
//! embedding host (through [`HostHooks`]) when it must stay in the foreground
//! and when it may tear itself down.
//!
//! ## Example
//!
//! ```rust,no_run
//! use service_host::{
//!     HostConfig, HostController, LogAggregator, MemoryStore, ProcessRegistry,
//!     ServiceOrchestrator, TracingHooks,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> service_host::Result<()> {
//! let config = HostConfig::default();
//! let log = LogAggregator::new(config.log_capacity);
//! let (sink, _drain) = log.attach(config.log_channel_capacity, config.log_overflow);
//! let registry = ProcessRegistry::new(config.resolver(), sink, config.stop_policy());
//! let orchestrator = Arc::new(ServiceOrchestrator::new(registry, log.clone(), Arc::new(TracingHooks)));
//!
//! let controller = HostController::new(orchestrator, Arc::new(MemoryStore::new()));
//! controller.on_host_start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod control;
mod identity;
mod log;
mod orchestrator;
mod preferences;
mod presence;
mod registry;

pub use config::{ConfigError, HostConfig};
pub use control::HostController;
pub use identity::ProcessIdentity;
pub use log::{LogAggregator, LogBuffer};
pub use orchestrator::{
    CommandReport, ProcessRequest, RequestOutcome, ServiceCommand, ServiceOrchestrator,
};
pub use preferences::{DesiredState, MemoryStore, PreferenceStore, SledStore, keys};
pub use presence::{ChannelHooks, HostHooks, HostSignal, TracingHooks};
pub use registry::{InstalledBinary, LaunchResolver, ProcessRegistry, StopAllReport};

/// Error types for host operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Process supervision errors
    #[error("Process supervision error: {0}")]
    Supervisor(#[from] process_supervisor::Error),

    /// A command arrived without any process requests
    #[error("Command contains no process requests")]
    EmptyRequest,

    /// The host is tearing down and accepts no new processes
    #[error("Host is shutting down")]
    ShuttingDown,

    /// Preference store error
    #[error("Preference store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sled database error
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a preference store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, Error>;
