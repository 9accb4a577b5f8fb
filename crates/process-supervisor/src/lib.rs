//! Supervision of a single long-running child process
//!
//! This crate spawns an external program, streams its merged stdout/stderr as
//! text lines into a bounded [`LineSink`], and terminates it with a
//! graceful-then-forced policy so that no process or reader task outlives a
//! completed [`ProcessSupervisor::stop`].

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod event;
pub mod launch;
pub mod process;
pub mod sink;
pub mod supervisor;

pub use backends::{LocalLauncher, LocalProcessHandle};
pub use command::Command;
pub use error::{Error, Result};
pub use event::{LogSource, ProcessEvent, ProcessEventType};
pub use launch::{BinaryLocation, LaunchSpec};
pub use process::{ExitReason, ExitStatus, ProcessState};
pub use sink::{LineSink, OverflowPolicy};
pub use supervisor::{ProcessSupervisor, StopOutcome, StopPolicy};
