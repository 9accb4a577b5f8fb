//! Error types for process supervision

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unified error type for spawning and controlling a supervised process
#[derive(Error, Debug)]
pub enum Error {
    /// The executable does not exist
    #[error("executable not found: {}", path.display())]
    ExecutableNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// The executable exists but may not be executed by this user
    #[error("permission denied executing {}", path.display())]
    PermissionDenied {
        /// Path that was rejected
        path: PathBuf,
    },

    /// Failed to spawn a process for any other reason (resource exhaustion, bad format)
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// `start` was called on a supervisor that already left the `Starting` state
    #[error("process was already started")]
    AlreadyStarted,

    /// I/O error
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Classify an I/O error returned by the OS while spawning `program`
    pub fn from_spawn(program: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::ExecutableNotFound {
                path: program.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: program.to_path_buf(),
            },
            _ => Self::spawn_failed(format!("{}: {}", program.display(), err)),
        }
    }

    /// Whether this error happened before any process existed
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            Self::ExecutableNotFound { .. } | Self::PermissionDenied { .. } | Self::SpawnFailed { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
