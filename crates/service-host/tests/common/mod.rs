//! Shared fixtures: a fake client binary and a fully wired host

#![allow(dead_code)]

use async_channel::Receiver;
use process_supervisor::{BinaryLocation, OverflowPolicy, StopPolicy};
use service_host::{
    ChannelHooks, HostSignal, InstalledBinary, LogAggregator, ProcessRegistry, ServiceOrchestrator,
};
use smol::Task;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Prints its arguments, then sleeps until terminated
pub const SLEEPER: &str = "echo \"started $*\"\nexec sleep 30\n";

/// Prints one line and exits on its own
pub const QUITTER: &str = "echo \"bye $*\"\nsleep 0.3\nexit 0\n";

/// Like [`SLEEPER`] but ignores SIGTERM
pub const STUBBORN: &str = "trap '' TERM\necho \"started $*\"\nexec sleep 30\n";

/// Short deadlines so forced kills do not slow the suite down
pub fn quick_policy() -> StopPolicy {
    StopPolicy {
        stop_timeout: Duration::from_millis(300),
        drain_timeout: Duration::from_millis(200),
    }
}

/// A shell script installed as the client binary in a scratch directory
pub struct FakeNpc {
    pub dir: TempDir,
}

impl FakeNpc {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_script(&dir.path().join("npc"), body);
        Self { dir }
    }

    pub fn location(&self) -> BinaryLocation {
        BinaryLocation::new(self.dir.path(), "npc")
    }

    pub fn resolver(&self) -> InstalledBinary {
        InstalledBinary::new(self.location(), Some(self.dir.path().to_path_buf()))
    }
}

pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Orchestrator wired to a fake binary, a live log and observable hooks
pub struct TestHost {
    pub npc: FakeNpc,
    pub log: LogAggregator,
    pub orchestrator: Arc<ServiceOrchestrator>,
    pub signals: Receiver<HostSignal>,
    _drain: Task<()>,
    _exits: Task<()>,
}

impl TestHost {
    pub fn new(script: &str, policy: StopPolicy) -> Self {
        let npc = FakeNpc::new(script);
        let log = LogAggregator::new(100);
        let (sink, drain) = log.attach(64, OverflowPolicy::Block);
        let registry = ProcessRegistry::new(npc.resolver(), sink, policy);
        let (hooks, signals) = ChannelHooks::new();
        let orchestrator = Arc::new(ServiceOrchestrator::new(registry, log.clone(), Arc::new(hooks)));
        let exits = orchestrator.spawn_exit_supervisor();
        Self {
            npc,
            log,
            orchestrator,
            signals,
            _drain: drain,
            _exits: exits,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        self.orchestrator.registry()
    }

    /// Every signal emitted so far
    pub fn drain_signals(&self) -> Vec<HostSignal> {
        std::iter::from_fn(|| self.signals.try_recv().ok()).collect()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        smol::Timer::after(Duration::from_millis(20)).await;
    }
}

/// Whether a process with this pid still exists
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
