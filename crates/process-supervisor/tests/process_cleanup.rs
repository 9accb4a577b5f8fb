//! Tests for process cleanup on drop

mod common;

use common::shell;
use process_supervisor::{LineSink, LocalLauncher, OverflowPolicy, ProcessSupervisor, StopPolicy};
use std::time::Duration;

#[test]
#[cfg(unix)]
fn test_process_cleanup_on_handle_drop() {
    smol::block_on(async {
        let cmd = shell("exec sleep 60").to_command();
        let (_events, handle) = LocalLauncher.launch(&cmd).await.unwrap();

        let pid = handle.pid();

        // Drop the handle - this should kill the process
        drop(handle);
        smol::Timer::after(Duration::from_millis(100)).await;

        assert!(!common::is_alive(pid), "Process should be killed when handle is dropped");
    });
}

#[test]
#[cfg(unix)]
fn test_process_survives_stream_drop() {
    smol::block_on(async {
        let cmd = shell("while true; do echo tick; sleep 0.1; done").to_command();
        let (events, mut handle) = LocalLauncher.launch(&cmd).await.unwrap();
        let pid = handle.pid();

        // Dropping the event stream alone does not stop the process
        drop(events);
        smol::Timer::after(Duration::from_millis(100)).await;
        assert!(common::is_alive(pid));

        handle.kill().unwrap();
        let status = handle.wait().await.unwrap();
        assert_eq!(status.signal, Some(9));
    });
}

#[test]
#[cfg(unix)]
fn test_dropping_supervisor_kills_process() {
    smol::block_on(async {
        let (sink, _rx) = LineSink::channel(4, OverflowPolicy::Block);
        let mut supervisor =
            ProcessSupervisor::new("dropped", shell("exec sleep 60"), sink, StopPolicy::default());
        let pid = supervisor.start().await.unwrap();

        drop(supervisor);
        smol::Timer::after(Duration::from_millis(100)).await;

        assert!(!common::is_alive(pid));
    });
}

#[test]
fn test_cleanup_already_exited_process() {
    smol::block_on(async {
        let cmd = shell("echo quick exit").to_command();
        let (_events, mut handle) = LocalLauncher.launch(&cmd).await.unwrap();

        let exit_status = handle.wait().await.unwrap();
        assert_eq!(exit_status.code, Some(0));
        assert_eq!(handle.try_wait().unwrap(), Some(exit_status));

        // Signals to an exited process are not errors
        handle.terminate().unwrap();
        drop(handle);
    });
}

