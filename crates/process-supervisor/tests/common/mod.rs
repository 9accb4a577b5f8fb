//! Common test utilities

#![allow(dead_code)]

use async_channel::Receiver;
use process_supervisor::LaunchSpec;
use std::time::Duration;

/// A launch spec running `script` through `/bin/sh -c`
pub fn shell(script: &str) -> LaunchSpec {
    LaunchSpec {
        program: "/bin/sh".into(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
    }
}

/// Receive `count` lines, giving up after `timeout`
pub async fn collect_lines(rx: &Receiver<String>, count: usize, timeout: Duration) -> Vec<String> {
    let mut lines = Vec::new();
    let deadline = std::time::Instant::now() + timeout;
    while lines.len() < count {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let next = smol::future::or(async { rx.recv().await.ok() }, async {
            smol::Timer::after(remaining).await;
            None
        })
        .await;
        match next {
            Some(line) => lines.push(line),
            None => break,
        }
    }
    lines
}

/// Whether a process with this pid still exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
