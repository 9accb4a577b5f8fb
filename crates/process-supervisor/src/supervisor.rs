//! Supervisor owning one spawned process and its output reader

use crate::backends::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
use crate::error::{Error, Result};
use crate::event::ProcessEventType;
use crate::launch::LaunchSpec;
use crate::process::{ExitReason, ExitStatus, ProcessState};
use crate::sink::LineSink;
use async_channel::Sender;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use smol::{Task, Timer};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deadlines applied when stopping a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopPolicy {
    /// How long a graceful termination request is given before the process is killed
    pub stop_timeout: Duration,
    /// How long the output reader may take to reach end-of-file after the process is gone
    pub drain_timeout: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(3),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// How a [`ProcessSupervisor::stop`] call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no process to stop
    NotRunning,
    /// The process had already exited on its own
    AlreadyExited(ExitStatus),
    /// The process exited after the graceful request
    Graceful(ExitStatus),
    /// The deadline passed and the process was killed
    Forced(ExitStatus),
}

impl StopOutcome {
    /// Exit status if a process was reaped
    pub fn status(&self) -> Option<ExitStatus> {
        match self {
            StopOutcome::NotRunning => None,
            StopOutcome::AlreadyExited(status)
            | StopOutcome::Graceful(status)
            | StopOutcome::Forced(status) => Some(*status),
        }
    }
}

type SharedState = Arc<Mutex<ProcessState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ProcessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Apply a transition if the state machine allows it
fn transition(state: &SharedState, next: ProcessState) -> bool {
    let mut current = lock(state);
    if current.can_transition_to(&next) {
        *current = next;
        true
    } else {
        false
    }
}

struct RunningProcess {
    handle: LocalProcessHandle,
    reader: Task<()>,
}

/// Owns one external process: spawn, stream output, terminate
///
/// Dropping a supervisor kills its process and cancels its reader task.
pub struct ProcessSupervisor {
    name: String,
    spec: LaunchSpec,
    sink: LineSink,
    policy: StopPolicy,
    launcher: LocalLauncher,
    state: SharedState,
    pid: Option<u32>,
    running: Option<RunningProcess>,
    exit_notice: Option<Sender<String>>,
}

impl ProcessSupervisor {
    /// Create a supervisor in the `Starting` state
    pub fn new(name: impl Into<String>, spec: LaunchSpec, sink: LineSink, policy: StopPolicy) -> Self {
        Self {
            name: name.into(),
            spec,
            sink,
            policy,
            launcher: LocalLauncher,
            state: Arc::new(Mutex::new(ProcessState::Starting)),
            pid: None,
            running: None,
            exit_notice: None,
        }
    }

    /// Send this supervisor's name on `notice` if the process exits without a stop request
    ///
    /// The process is reaped by the next [`stop`](Self::stop), which then
    /// reports [`StopOutcome::AlreadyExited`].
    pub fn notify_on_exit(&mut self, notice: Sender<String>) {
        self.exit_notice = Some(notice);
    }

    /// Name used in log records
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved invocation
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        lock(&self.state).clone()
    }

    /// OS process id once spawned
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is spawned and its output still open
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ProcessState::Running)
    }

    /// Spawn the process and start reading its output
    pub async fn start(&mut self) -> Result<u32> {
        if !matches!(self.state(), ProcessState::Starting) {
            return Err(Error::AlreadyStarted);
        }

        let command = self.spec.to_command();
        info!(name = %self.name, command = %command, "Starting process");

        let (events, handle) = match self.launcher.launch(&command).await {
            Ok(launched) => launched,
            Err(e) => {
                warn!(name = %self.name, error = %e, "Failed to spawn process");
                transition(&self.state, ProcessState::Exited(ExitReason::SpawnFailed(e.to_string())));
                return Err(e);
            }
        };

        let pid = handle.pid();
        transition(&self.state, ProcessState::Running);

        let reader = smol::spawn(read_output(
            self.name.clone(),
            events,
            self.sink.clone(),
            self.state.clone(),
            self.exit_notice.clone(),
        ));

        self.pid = Some(pid);
        self.running = Some(RunningProcess { handle, reader });
        info!(name = %self.name, pid, "Process started");
        Ok(pid)
    }

    /// Terminate the process: graceful request, bounded wait, then kill
    ///
    /// When this returns `Ok`, the OS process has been reaped and the reader
    /// task has finished. A forced kill is reported as [`StopOutcome::Forced`],
    /// not as an error.
    pub async fn stop(&mut self) -> Result<StopOutcome> {
        let Some(mut running) = self.running.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        transition(&self.state, ProcessState::Stopping);

        let outcome = match self.terminate(&mut running.handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep ownership so a later stop (or drop) can still kill it
                self.running = Some(running);
                return Err(e);
            }
        };

        self.drain(running.reader).await;

        let status = outcome.status();
        let forced = matches!(outcome, StopOutcome::Forced(_));
        transition(&self.state, ProcessState::Exited(ExitReason::Stopped { status, forced }));
        info!(name = %self.name, pid = ?self.pid, ?outcome, "Process stopped");
        Ok(outcome)
    }

    async fn terminate(&self, handle: &mut LocalProcessHandle) -> Result<StopOutcome> {
        if let Some(status) = handle.try_wait()? {
            debug!(name = %self.name, %status, "Process had already exited");
            return Ok(StopOutcome::AlreadyExited(status));
        }

        if let Err(e) = handle.terminate() {
            warn!(name = %self.name, error = %e, "Graceful termination request failed");
        }

        if let Some(status) = wait_with_deadline(handle, self.policy.stop_timeout).await? {
            return Ok(StopOutcome::Graceful(status));
        }

        warn!(
            name = %self.name,
            pid = ?self.pid,
            timeout = ?self.policy.stop_timeout,
            "Process did not exit in time, killing it"
        );
        handle.kill()?;
        let status = handle.wait().await?;
        Ok(StopOutcome::Forced(status))
    }

    /// Wait for the reader to hit end-of-file, cancelling it past the drain deadline
    async fn drain(&self, mut reader: Task<()>) {
        let finished = smol::future::or(
            async {
                (&mut reader).await;
                true
            },
            async {
                Timer::after(self.policy.drain_timeout).await;
                false
            },
        )
        .await;

        if !finished {
            warn!(name = %self.name, "Output still open after exit, cancelling reader");
            reader.cancel().await;
        }
    }
}

async fn wait_with_deadline(
    handle: &mut LocalProcessHandle,
    timeout: Duration,
) -> Result<Option<ExitStatus>> {
    smol::future::or(async { handle.wait().await.map(Some) }, async {
        Timer::after(timeout).await;
        Ok(None)
    })
    .await
}

/// Forward every output line to the sink until both pipes close
async fn read_output(
    name: String,
    mut events: ProcessEventStream,
    sink: LineSink,
    state: SharedState,
    exit_notice: Option<Sender<String>>,
) {
    let mut delivered = true;
    let mut lines = 0u64;

    while let Some(event) = events.next().await {
        if let ProcessEventType::Started { pid } = event.event_type {
            debug!(%name, pid, "Reading process output");
            continue;
        }
        if let Some(line) = event.data {
            lines += 1;
            if delivered {
                delivered = sink.deliver(line).await;
            }
        }
    }

    // A stop in progress owns the final transition
    let closed_by_itself = {
        let mut current = lock(&state);
        let running = matches!(*current, ProcessState::Running);
        if running {
            *current = ProcessState::Exited(ExitReason::OutputClosed);
        }
        running
    };
    if closed_by_itself {
        info!(%name, lines, "Process output closed");
        if let Some(notice) = exit_notice {
            let _ = notice.send(name).await;
        }
    } else {
        debug!(%name, lines, "Process output closed during stop");
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("state", &self.state())
            .field("pid", &self.pid)
            .finish()
    }
}
