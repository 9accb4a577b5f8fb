//! Start/stop commands and foreground presence bookkeeping

use crate::log::LogAggregator;
use crate::presence::HostHooks;
use crate::registry::{ProcessRegistry, StopAllReport};
use crate::{Error, ProcessIdentity, Result};
use futures::future::join_all;
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use smol::Task;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// One process named in a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Registry key
    pub identity: ProcessIdentity,
    /// Command string to resolve into arguments
    pub command: String,
}

impl ProcessRequest {
    /// Request keyed by the command string itself
    pub fn from_command(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            identity: ProcessIdentity::new(command.clone()),
            command,
        }
    }
}

/// Command accepted by [`ServiceOrchestrator::handle`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "requests")]
pub enum ServiceCommand {
    /// Start (or restart) every listed process
    Start(Vec<ProcessRequest>),
    /// Stop every listed process
    Stop(Vec<ProcessRequest>),
}

/// What happened to a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// The process is running with this pid
    Started {
        /// OS process id
        pid: u32,
    },
    /// The process was stopped and unregistered
    Stopped,
    /// Nothing was registered under the identity
    NotRunning,
    /// The request failed; other requests were unaffected
    Failed(String),
}

/// Per-request outcomes of one command, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    /// Identity and outcome for each request
    pub outcomes: Vec<(ProcessIdentity, RequestOutcome)>,
}

impl CommandReport {
    /// Requests that failed, with their error messages
    pub fn failures(&self) -> impl Iterator<Item = (&ProcessIdentity, &str)> {
        self.outcomes.iter().filter_map(|(identity, outcome)| match outcome {
            RequestOutcome::Failed(reason) => Some((identity, reason.as_str())),
            _ => None,
        })
    }

    /// Whether no request failed
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Outcome recorded for `identity`
    pub fn outcome(&self, identity: &ProcessIdentity) -> Option<&RequestOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, outcome)| outcome)
    }
}

/// Top-level control surface of the host
///
/// Owns the registry and tracks whether foreground presence is active, so the
/// host is told to tear down exactly once each time the last process stops.
pub struct ServiceOrchestrator {
    registry: ProcessRegistry,
    log: LogAggregator,
    hooks: Arc<dyn HostHooks>,
    /// Whether presence is currently established
    presence: Mutex<bool>,
    closing: AtomicBool,
}

impl ServiceOrchestrator {
    /// Create an orchestrator
    pub fn new(registry: ProcessRegistry, log: LogAggregator, hooks: Arc<dyn HostHooks>) -> Self {
        Self {
            registry,
            log,
            hooks,
            presence: Mutex::new(false),
            closing: AtomicBool::new(false),
        }
    }

    /// Dispatch a command
    pub async fn handle(&self, command: ServiceCommand) -> Result<CommandReport> {
        match command {
            ServiceCommand::Start(requests) => self.start(&requests).await,
            ServiceCommand::Stop(requests) => self.stop(&requests).await,
        }
    }

    /// Start every request concurrently, then establish presence
    ///
    /// A failing request is recorded in the report and never blocks the others.
    pub async fn start(&self, requests: &[ProcessRequest]) -> Result<CommandReport> {
        if requests.is_empty() {
            return Err(Error::EmptyRequest);
        }
        if self.is_shutting_down() {
            warn!(count = requests.len(), "Rejecting start, host is shutting down");
            return Err(Error::ShuttingDown);
        }

        info!(count = requests.len(), "Handling start command");
        let outcomes = join_all(requests.iter().map(|request| async move {
            let outcome = match self.registry.start(&request.identity, &request.command).await {
                Ok(pid) => RequestOutcome::Started { pid },
                Err(e) => {
                    warn!(identity = %request.identity, error = %e, "Failed to start process");
                    RequestOutcome::Failed(e.to_string())
                }
            };
            (request.identity.clone(), outcome)
        }))
        .await;

        self.refresh_presence().await;
        Ok(CommandReport { outcomes })
    }

    /// Stop every request, then release presence if nothing is left
    pub async fn stop(&self, requests: &[ProcessRequest]) -> Result<CommandReport> {
        if requests.is_empty() {
            return Err(Error::EmptyRequest);
        }

        info!(count = requests.len(), "Handling stop command");
        let outcomes = join_all(requests.iter().map(|request| async move {
            let outcome = match self.registry.stop(&request.identity).await {
                Ok(true) => RequestOutcome::Stopped,
                Ok(false) => RequestOutcome::NotRunning,
                Err(e) => {
                    warn!(identity = %request.identity, error = %e, "Failed to stop process");
                    RequestOutcome::Failed(e.to_string())
                }
            };
            (request.identity.clone(), outcome)
        }))
        .await;

        self.release_presence_if_empty().await;
        Ok(CommandReport { outcomes })
    }

    /// Host teardown: refuse new starts and stop everything
    ///
    /// Presence is removed without requesting teardown, since the host is
    /// already going away. Calling this again only repeats the stop.
    pub async fn shutdown(&self) -> StopAllReport {
        if !self.closing.swap(true, Ordering::SeqCst) {
            info!("Host teardown started");
        }

        let mut report = StopAllReport::default();
        loop {
            // A start admitted just before closing may register after the first pass
            let pass = self.registry.stop_all().await;
            let progressed = !pass.stopped.is_empty();
            report.stopped.extend(pass.stopped);
            report.failed = pass.failed;
            if self.registry.is_empty() || !progressed {
                break;
            }
        }

        let mut active = self.presence.lock().await;
        if *active && self.registry.is_empty() {
            *active = false;
            self.hooks.presence_removed();
        }

        if report.is_clean() {
            info!(stopped = report.stopped.len(), "Host teardown finished");
        } else {
            warn!(failed = ?report.failed, "Host teardown left processes running");
        }
        report
    }

    /// Unregister processes that exit by themselves, releasing presence when none is left
    ///
    /// Runs until dropped. Without it an exited process stays registered until
    /// it is stopped explicitly.
    pub async fn supervise_exits(&self) {
        loop {
            let identity = self.registry.exited().await;
            match self.registry.reap(&identity).await {
                Ok(true) => {
                    warn!(%identity, "Process exited unexpectedly");
                    if !self.is_shutting_down() {
                        self.release_presence_if_empty().await;
                    }
                }
                Ok(false) => debug!(%identity, "Exit notice for an instance no longer registered"),
                Err(e) => warn!(%identity, error = %e, "Failed to clean up exited process"),
            }
        }
    }

    /// Run [`supervise_exits`](Self::supervise_exits) on a background task
    pub fn spawn_exit_supervisor(self: &Arc<Self>) -> Task<()> {
        let orchestrator = self.clone();
        smol::spawn(async move { orchestrator.supervise_exits().await })
    }

    async fn refresh_presence(&self) {
        let mut active = self.presence.lock().await;
        let running = self.registry.len();
        if running > 0 {
            *active = true;
            self.hooks.presence_established(running);
        } else if *active {
            // Every start failed and nothing else is running
            *active = false;
            self.hooks.presence_removed();
            self.hooks.teardown_requested();
        }
    }

    async fn release_presence_if_empty(&self) {
        let mut active = self.presence.lock().await;
        if !self.registry.is_empty() {
            return;
        }
        if *active {
            *active = false;
            self.hooks.presence_removed();
            self.hooks.teardown_requested();
        } else {
            debug!("Registry empty, presence already released");
        }
    }

    /// Whether teardown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Whether foreground presence is established
    pub async fn has_presence(&self) -> bool {
        *self.presence.lock().await
    }

    /// The process registry
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// The shared log
    pub fn log(&self) -> &LogAggregator {
        &self.log
    }
}

impl std::fmt::Debug for ServiceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOrchestrator")
            .field("registry", &self.registry)
            .field("log", &self.log)
            .field("closing", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{ChannelHooks, HostSignal};
    use crate::registry::InstalledBinary;
    use process_supervisor::{BinaryLocation, LineSink, OverflowPolicy, StopPolicy};

    fn orchestrator() -> (ServiceOrchestrator, async_channel::Receiver<HostSignal>) {
        let log = LogAggregator::new(16);
        let (sink, _rx) = LineSink::channel(8, OverflowPolicy::DropNewest);
        let resolver = InstalledBinary::new(BinaryLocation::new("/nonexistent", "npc"), None);
        let registry = ProcessRegistry::new(resolver, sink, StopPolicy::default());
        let (hooks, signals) = ChannelHooks::new();
        (ServiceOrchestrator::new(registry, log, Arc::new(hooks)), signals)
    }

    #[smol_potat::test]
    async fn test_empty_request_rejected() {
        let (orchestrator, _signals) = orchestrator();

        assert!(matches!(
            orchestrator.handle(ServiceCommand::Start(vec![])).await,
            Err(Error::EmptyRequest)
        ));
        assert!(matches!(
            orchestrator.handle(ServiceCommand::Stop(vec![])).await,
            Err(Error::EmptyRequest)
        ));
    }

    #[smol_potat::test]
    async fn test_failed_start_reports_without_presence() {
        let (orchestrator, signals) = orchestrator();
        let request = ProcessRequest::from_command("-server=a:1");

        let report = orchestrator.start(&[request.clone()]).await.unwrap();

        assert!(!report.is_success());
        assert!(matches!(
            report.outcome(&request.identity),
            Some(RequestOutcome::Failed(_))
        ));
        assert!(!orchestrator.has_presence().await);
        assert!(signals.try_recv().is_err());
    }

    #[smol_potat::test]
    async fn test_stop_without_presence_signals_nothing() {
        let (orchestrator, signals) = orchestrator();

        let report = orchestrator
            .stop(&[ProcessRequest::from_command("-a")])
            .await
            .unwrap();

        assert_eq!(
            report.outcomes,
            vec![(ProcessIdentity::new("-a"), RequestOutcome::NotRunning)]
        );
        assert!(signals.try_recv().is_err());
    }

    #[smol_potat::test]
    async fn test_start_after_shutdown_is_rejected() {
        let (orchestrator, _signals) = orchestrator();

        assert!(orchestrator.shutdown().await.is_clean());
        assert!(orchestrator.is_shutting_down());
        assert!(matches!(
            orchestrator.start(&[ProcessRequest::from_command("-a")]).await,
            Err(Error::ShuttingDown)
        ));

        // Idempotent
        assert_eq!(orchestrator.shutdown().await, StopAllReport::default());
    }

    #[test]
    fn test_command_serialization() {
        let command = ServiceCommand::Start(vec![ProcessRequest::from_command("-a")]);
        let json = serde_json::to_value(&command).unwrap();

        assert_eq!(json["action"], "start");
        assert_eq!(json["requests"][0]["identity"], "-a");
        assert_eq!(json["requests"][0]["command"], "-a");
    }
}
