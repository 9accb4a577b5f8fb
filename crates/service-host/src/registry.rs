//! Registry of live processes keyed by identity
//!
//! The map lock is held only to look up or remove a slot. Each identity has
//! its own async slot lock held across its start or stop, so a slow shutdown
//! of one process never delays operations on another.

use crate::{Error, ProcessIdentity, Result};
use async_channel::{Receiver, Sender};
use futures::future::join_all;
use futures::lock::Mutex as SlotMutex;
use process_supervisor::{
    BinaryLocation, ExitReason, LaunchSpec, LineSink, ProcessState, ProcessSupervisor, StopPolicy,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Turns a command string into a launch spec
pub trait LaunchResolver: Send + Sync {
    /// Resolve `command` into the executable, its arguments and working directory
    fn resolve(&self, command: &str) -> LaunchSpec;
}

impl<F> LaunchResolver for F
where
    F: Fn(&str) -> LaunchSpec + Send + Sync,
{
    fn resolve(&self, command: &str) -> LaunchSpec {
        self(command)
    }
}

/// Resolves every command against one installed client binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    /// Where the executable lives
    pub location: BinaryLocation,
    /// Working directory for every process
    pub working_dir: Option<PathBuf>,
}

impl InstalledBinary {
    /// Create a resolver
    pub fn new(location: BinaryLocation, working_dir: Option<PathBuf>) -> Self {
        Self {
            location,
            working_dir,
        }
    }
}

impl LaunchResolver for InstalledBinary {
    fn resolve(&self, command: &str) -> LaunchSpec {
        LaunchSpec::resolve(&self.location, command, self.working_dir.as_deref())
    }
}

/// Result of [`ProcessRegistry::stop_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopAllReport {
    /// Identities whose process was stopped and removed
    pub stopped: Vec<ProcessIdentity>,
    /// Identities that could not be stopped, with the reason; they stay registered
    pub failed: Vec<(ProcessIdentity, String)>,
}

impl StopAllReport {
    /// Whether every process was stopped
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct Slot {
    supervisor: Option<ProcessSupervisor>,
    /// Set once the slot is removed from the map; holders must look again
    retired: bool,
}

type SlotRef = Arc<SlotMutex<Slot>>;

/// Maps identities to running supervisors, at most one per identity
pub struct ProcessRegistry {
    resolver: Box<dyn LaunchResolver>,
    sink: LineSink,
    policy: StopPolicy,
    slots: Mutex<HashMap<ProcessIdentity, SlotRef>>,
    exit_tx: Sender<String>,
    exit_rx: Receiver<String>,
}

impl ProcessRegistry {
    /// Create an empty registry
    ///
    /// Every supervisor it creates delivers its output into `sink`.
    pub fn new(resolver: impl LaunchResolver + 'static, sink: LineSink, policy: StopPolicy) -> Self {
        let (exit_tx, exit_rx) = async_channel::unbounded();
        Self {
            resolver: Box::new(resolver),
            sink,
            policy,
            slots: Mutex::new(HashMap::new()),
            exit_tx,
            exit_rx,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ProcessIdentity, SlotRef>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot_or_insert(&self, identity: &ProcessIdentity) -> SlotRef {
        self.slots()
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(SlotMutex::new(Slot::default())))
            .clone()
    }

    fn existing_slot(&self, identity: &ProcessIdentity) -> Option<SlotRef> {
        self.slots().get(identity).cloned()
    }

    /// Mark the slot retired and drop it from the map if it is still the current one
    fn retire(&self, identity: &ProcessIdentity, slot: &SlotRef, guard: &mut Slot) {
        guard.retired = true;
        let mut slots = self.slots();
        if slots.get(identity).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(identity);
        }
    }

    /// Start a process for `identity`, replacing any running instance
    ///
    /// A previous instance is fully stopped before the replacement is
    /// spawned. If that stop fails the previous instance stays registered and
    /// the error is returned. If the spawn fails the identity is absent
    /// afterwards.
    pub async fn start(&self, identity: &ProcessIdentity, command: &str) -> Result<u32> {
        loop {
            let slot = self.slot_or_insert(identity);
            let mut guard = slot.lock().await;
            if guard.retired {
                debug!(%identity, "Slot retired while waiting, retrying");
                continue;
            }

            if let Some(mut previous) = guard.supervisor.take() {
                info!(%identity, pid = ?previous.pid(), "Stopping previous instance before restart");
                if let Err(e) = previous.stop().await {
                    warn!(%identity, error = %e, "Failed to stop previous instance");
                    guard.supervisor = Some(previous);
                    return Err(e.into());
                }
            }

            let spec = self.resolver.resolve(command);
            let mut supervisor =
                ProcessSupervisor::new(identity.to_string(), spec, self.sink.clone(), self.policy);
            supervisor.notify_on_exit(self.exit_tx.clone());

            return match supervisor.start().await {
                Ok(pid) => {
                    guard.supervisor = Some(supervisor);
                    info!(%identity, pid, "Process registered");
                    Ok(pid)
                }
                Err(e) => {
                    self.retire(identity, &slot, &mut guard);
                    Err(Error::from(e))
                }
            };
        }
    }

    /// Stop the process for `identity`
    ///
    /// Returns `Ok(false)` if nothing was registered. The entry is removed only
    /// once the process is confirmed gone; on error it stays registered.
    pub async fn stop(&self, identity: &ProcessIdentity) -> Result<bool> {
        loop {
            let Some(slot) = self.existing_slot(identity) else {
                debug!(%identity, "Stop requested for unknown identity");
                return Ok(false);
            };
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            let Some(mut supervisor) = guard.supervisor.take() else {
                // Slot created by a start that has not spawned yet
                self.retire(identity, &slot, &mut guard);
                return Ok(false);
            };

            return match supervisor.stop().await {
                Ok(outcome) => {
                    self.retire(identity, &slot, &mut guard);
                    info!(%identity, ?outcome, "Process unregistered");
                    Ok(true)
                }
                Err(e) => {
                    warn!(%identity, error = %e, "Failed to stop process, keeping it registered");
                    guard.supervisor = Some(supervisor);
                    Err(e.into())
                }
            };
        }
    }

    /// Wait for a registered process to exit without a stop request
    ///
    /// The identity stays registered until [`reap`](Self::reap) is called.
    /// The notice may be stale if the identity was restarted meanwhile.
    pub async fn exited(&self) -> ProcessIdentity {
        match self.exit_rx.recv().await {
            Ok(name) => ProcessIdentity::new(name),
            // The registry holds a sender, so the channel never closes
            Err(_) => futures::future::pending().await,
        }
    }

    /// Unregister `identity` if its process exited by itself
    ///
    /// Returns `Ok(true)` if an entry was reaped and removed. A running
    /// instance, such as one started after the exit notice, is left alone.
    pub async fn reap(&self, identity: &ProcessIdentity) -> Result<bool> {
        let Some(slot) = self.existing_slot(identity) else {
            return Ok(false);
        };
        let mut guard = slot.lock().await;
        if guard.retired {
            return Ok(false);
        }
        let exited = guard.supervisor.as_ref().is_some_and(|supervisor| {
            matches!(supervisor.state(), ProcessState::Exited(ExitReason::OutputClosed))
        });
        let Some(mut supervisor) = guard.supervisor.take_if(|_| exited) else {
            return Ok(false);
        };

        match supervisor.stop().await {
            Ok(outcome) => {
                self.retire(identity, &slot, &mut guard);
                info!(%identity, ?outcome, "Process exited by itself, unregistered");
                Ok(true)
            }
            Err(e) => {
                warn!(%identity, error = %e, "Failed to reap exited process");
                guard.supervisor = Some(supervisor);
                Err(e.into())
            }
        }
    }

    /// Stop every registered process concurrently
    pub async fn stop_all(&self) -> StopAllReport {
        let identities = self.identities();
        info!(count = identities.len(), "Stopping all processes");

        let results = join_all(identities.into_iter().map(|identity| async move {
            let result = self.stop(&identity).await;
            (identity, result)
        }))
        .await;

        let mut report = StopAllReport::default();
        for (identity, result) in results {
            match result {
                Ok(true) => report.stopped.push(identity),
                Ok(false) => {}
                Err(e) => report.failed.push((identity, e.to_string())),
            }
        }
        report
    }

    /// Whether no process is registered
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Whether `identity` is registered
    pub fn contains(&self, identity: &ProcessIdentity) -> bool {
        self.slots().contains_key(identity)
    }

    /// Registered identities, sorted
    pub fn identities(&self) -> Vec<ProcessIdentity> {
        let mut identities: Vec<_> = self.slots().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Pid of the process registered for `identity`
    ///
    /// Waits for an in-flight start or stop of that identity.
    pub async fn pid(&self, identity: &ProcessIdentity) -> Option<u32> {
        let slot = self.existing_slot(identity)?;
        let guard = slot.lock().await;
        guard.supervisor.as_ref().and_then(ProcessSupervisor::pid)
    }

    /// Lifecycle state of the process registered for `identity`
    pub async fn state(&self, identity: &ProcessIdentity) -> Option<ProcessState> {
        let slot = self.existing_slot(identity)?;
        let guard = slot.lock().await;
        guard.supervisor.as_ref().map(ProcessSupervisor::state)
    }

    /// Resolve `command` the way [`start`](Self::start) would
    pub fn resolve(&self, command: &str) -> LaunchSpec {
        self.resolver.resolve(command)
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("policy", &self.policy)
            .field("identities", &self.identities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_supervisor::OverflowPolicy;

    fn registry_with_missing_binary() -> ProcessRegistry {
        let (sink, _rx) = LineSink::channel(8, OverflowPolicy::DropNewest);
        let resolver = InstalledBinary::new(BinaryLocation::new("/nonexistent/lib", "npc"), None);
        ProcessRegistry::new(resolver, sink, StopPolicy::default())
    }

    #[smol_potat::test]
    async fn test_spawn_failure_leaves_identity_absent() {
        let registry = registry_with_missing_binary();
        let id = ProcessIdentity::new("-server=a:1");

        let err = registry.start(&id, "-server=a:1").await.unwrap_err();

        assert!(matches!(
            err,
            Error::Supervisor(process_supervisor::Error::ExecutableNotFound { .. })
        ));
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
    }

    #[smol_potat::test]
    async fn test_stop_unknown_identity_is_noop() {
        let registry = registry_with_missing_binary();

        assert!(!registry.stop(&ProcessIdentity::new("-x")).await.unwrap());
        assert!(registry.stop_all().await.is_clean());
    }

    #[test]
    fn test_resolver_uses_location_and_working_dir() {
        let resolver = InstalledBinary::new(
            BinaryLocation::new("/opt/npc", "npc"),
            Some(PathBuf::from("/var/lib/npc")),
        );
        let spec = resolver.resolve("-vkey=k");

        assert_eq!(spec.program, PathBuf::from("/opt/npc/npc"));
        assert_eq!(spec.args, vec!["-vkey=k", "-debug=false", "-log=stdout"]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/var/lib/npc")));
    }
}
