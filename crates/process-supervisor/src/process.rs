//! Exit status and lifecycle state of a supervised process

use std::fmt;

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            return write!(f, "exit code {code}");
        }
        #[cfg(unix)]
        if let Some(signal) = self.signal {
            return write!(f, "signal {signal}");
        }
        write!(f, "unknown status")
    }
}

/// Lifecycle of one supervised process
///
/// `Starting → Running → Stopping → Exited`. `Starting` may fail straight to
/// `Exited`, and `Running` reaches `Exited` by itself when the output stream
/// closes. Nothing leaves `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Created, not yet spawned
    Starting,
    /// Spawned and being read
    Running,
    /// Termination requested, waiting for confirmation
    Stopping,
    /// Terminal state
    Exited(ExitReason),
}

/// Why a process reached [`ProcessState::Exited`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The OS refused to spawn the executable
    SpawnFailed(String),
    /// The output stream reached end-of-file without a stop request
    OutputClosed,
    /// Stopped through the supervisor
    Stopped {
        /// Exit status as reaped
        status: Option<ExitStatus>,
        /// Whether the deadline passed and the process had to be killed
        forced: bool,
    },
}

impl ProcessState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Exited(_))
                | (Running, Stopping)
                | (Running, Exited(_))
                | (Stopping, Exited(_))
        )
    }

    /// Whether this is the terminal state
    pub fn is_exited(&self) -> bool {
        matches!(self, ProcessState::Exited(_))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Exited(ExitReason::SpawnFailed(reason)) => {
                write!(f, "exited (spawn failed: {reason})")
            }
            ProcessState::Exited(ExitReason::OutputClosed) => write!(f, "exited (output closed)"),
            ProcessState::Exited(ExitReason::Stopped { forced: true, .. }) => {
                write!(f, "exited (killed)")
            }
            ProcessState::Exited(ExitReason::Stopped { .. }) => write!(f, "exited (stopped)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        let stopped = ProcessState::Exited(ExitReason::Stopped {
            status: None,
            forced: false,
        });

        assert!(ProcessState::Starting.can_transition_to(&ProcessState::Running));
        assert!(ProcessState::Starting.can_transition_to(&ProcessState::Exited(
            ExitReason::SpawnFailed("missing".into())
        )));
        assert!(ProcessState::Running.can_transition_to(&ProcessState::Stopping));
        assert!(ProcessState::Running.can_transition_to(&ProcessState::Exited(ExitReason::OutputClosed)));
        assert!(ProcessState::Stopping.can_transition_to(&stopped));

        assert!(!ProcessState::Starting.can_transition_to(&ProcessState::Stopping));
        assert!(!ProcessState::Stopping.can_transition_to(&ProcessState::Running));
        assert!(!ProcessState::Running.can_transition_to(&ProcessState::Starting));
    }

    #[test]
    fn test_no_transition_out_of_exited() {
        let exited = ProcessState::Exited(ExitReason::OutputClosed);
        assert!(exited.is_exited());
        for next in [
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Stopping,
            ProcessState::Exited(ExitReason::OutputClosed),
        ] {
            assert!(!exited.can_transition_to(&next));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_display() {
        let by_code = ExitStatus { code: Some(3), signal: None };
        assert_eq!(by_code.to_string(), "exit code 3");

        let by_signal = ExitStatus { code: None, signal: Some(9) };
        assert_eq!(by_signal.to_string(), "signal 9");
    }
}
