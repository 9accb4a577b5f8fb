//! Backend implementations for launching supervised processes

pub mod local;
pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
