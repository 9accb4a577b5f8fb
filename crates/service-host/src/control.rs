//! User-facing controls and auto-resume
//!
//! Each control persists the user's choice first and then issues the matching
//! start or stop command, so the stored state always reflects intent even when
//! a process fails to start.

use crate::orchestrator::{CommandReport, ProcessRequest, ServiceOrchestrator};
use crate::preferences::{DesiredState, PreferenceStore, keys};
use crate::Result;
use futures::lock::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies preference changes and boot events to the orchestrator
pub struct HostController {
    orchestrator: Arc<ServiceOrchestrator>,
    store: Arc<dyn PreferenceStore>,
    /// Serializes controls so a save never interleaves with a toggle
    ops: Mutex<()>,
}

impl HostController {
    /// Create a controller
    pub fn new(orchestrator: Arc<ServiceOrchestrator>, store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            orchestrator,
            store,
            ops: Mutex::new(()),
        }
    }

    /// Current persisted state
    pub async fn desired_state(&self) -> DesiredState {
        DesiredState::load(self.store.as_ref()).await
    }

    /// Device boot: resume only if auto-start and running are set and a command exists
    pub async fn on_boot(&self) -> Result<Option<CommandReport>> {
        let _ops = self.ops.lock().await;
        let state = self.desired_state().await;
        if !state.should_resume_on_boot() {
            debug!(
                auto_start = state.auto_start,
                running = state.running,
                has_command = !state.cmd_str.is_empty(),
                "Boot event ignored"
            );
            return Ok(None);
        }

        info!("Resuming process after boot");
        self.start_command(&state.cmd_str).await.map(Some)
    }

    /// Host start: apply the log toggle and resume a process that should be running
    pub async fn on_host_start(&self) -> Result<Option<CommandReport>> {
        let _ops = self.ops.lock().await;
        let state = self.desired_state().await;
        self.orchestrator.log().set_enabled(state.log_output_enabled);

        if !state.should_resume() {
            return Ok(None);
        }
        info!("Resuming process on host start");
        self.start_command(&state.cmd_str).await.map(Some)
    }

    /// Turn the process on or off
    pub async fn set_running(&self, running: bool) -> Result<Option<CommandReport>> {
        let _ops = self.ops.lock().await;
        self.store.put(keys::RUNNING, Value::Bool(running)).await?;

        let state = self.desired_state().await;
        if state.cmd_str.is_empty() {
            warn!(running, "No command configured, nothing to start or stop");
            return Ok(None);
        }

        let report = if running {
            self.start_command(&state.cmd_str).await?
        } else {
            self.stop_command(&state.cmd_str).await?
        };
        Ok(Some(report))
    }

    /// Set whether the process resumes at boot
    pub async fn set_auto_start(&self, auto_start: bool) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.store.put(keys::AUTO_START, Value::Bool(auto_start)).await
    }

    /// Replace the command string, restarting under the new identity if running
    pub async fn save_command(&self, command: &str) -> Result<Option<CommandReport>> {
        let _ops = self.ops.lock().await;
        let previous = self.desired_state().await;
        self.store
            .put(keys::CMD_STR, Value::String(command.to_string()))
            .await?;

        if !previous.running {
            return Ok(None);
        }

        if !previous.cmd_str.is_empty() {
            self.stop_command(&previous.cmd_str).await?;
        }
        if command.is_empty() {
            return Ok(None);
        }
        self.start_command(command).await.map(Some)
    }

    /// Turn log output on or off
    pub async fn set_log_enabled(&self, enabled: bool) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.store
            .put(keys::LOG_OUTPUT_ENABLED, Value::Bool(enabled))
            .await?;
        self.orchestrator.log().set_enabled(enabled);
        Ok(())
    }

    /// Empty the log
    pub fn clear_log(&self) {
        self.orchestrator.log().clear();
    }

    /// Current log content
    pub fn log_snapshot(&self) -> String {
        self.orchestrator.log().snapshot()
    }

    /// The orchestrator driven by this controller
    pub fn orchestrator(&self) -> &Arc<ServiceOrchestrator> {
        &self.orchestrator
    }

    async fn start_command(&self, command: &str) -> Result<CommandReport> {
        self.orchestrator
            .start(&[ProcessRequest::from_command(command)])
            .await
    }

    async fn stop_command(&self, command: &str) -> Result<CommandReport> {
        self.orchestrator
            .stop(&[ProcessRequest::from_command(command)])
            .await
    }
}

impl std::fmt::Debug for HostController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostController")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
