//! Local process execution backend

use async_process::{Child, ChildStderr, ChildStdout};
use futures::stream::Stream;
use futures_lite::io::{AsyncBufReadExt, BufReader, Split};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{LogSource, ProcessEvent, ProcessEventType};
use crate::process::ExitStatus;

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to control a local process
pub struct LocalProcessHandle {
    /// The underlying child process; killed on drop if still running
    child: Child,
}

type LineSplit<R> = Split<BufReader<R>>;

/// Stream of process events with stdout and stderr merged in arrival order
pub struct ProcessEventStream {
    stdout: Option<LineSplit<ChildStdout>>,
    stderr: Option<LineSplit<ChildStderr>>,
    started_sent: bool,
    child_id: u32,
    /// Which pipe gets polled first next time, so a chatty stdout cannot starve stderr
    stderr_first: bool,
}

impl LocalLauncher {
    /// Spawn `command`, returning its merged output stream and a control handle
    ///
    /// The stream starts with a `Started` event, then yields stdout and stderr
    /// lines in arrival order, and ends once both pipes are closed.
    pub async fn launch(&self, command: &Command) -> Result<(ProcessEventStream, LocalProcessHandle)> {
        let mut async_cmd = command.prepare();

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::from_spawn(command.get_program(), e))?;

        let child_id = child.id();
        debug!(pid = child_id, command = %command, "Spawned local process");

        let stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
        let stderr = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));

        let events = ProcessEventStream {
            stdout,
            stderr,
            started_sent: false,
            child_id,
            stderr_first: false,
        };

        let handle = LocalProcessHandle { child };

        Ok((events, handle))
    }
}

impl LocalProcessHandle {
    #[cfg(unix)]
    fn send_signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        match signal::kill(pid, signal) {
            // Already gone: nothing left to signal
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::signal_failed(signal as i32, e.to_string())),
        }
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the process to exit and reap it
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await?;
        Ok(status.into())
    }

    /// Reap the process if it already exited, without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_status()?.map(ExitStatus::from))
    }

    /// Ask the process to exit (SIGTERM)
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.send_signal(nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }

    /// Kill the process (SIGKILL)
    pub fn kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.send_signal(nix::sys::signal::Signal::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        if matches!(self.child.try_status(), Ok(None)) {
            // Synchronous kill; async-process reaps the child in the background
            let _ = self.child.kill();
        }
    }
}

/// Decode one raw line; invalid UTF-8 is replaced rather than ending the stream
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Poll one pipe, closing it on EOF or read error
fn poll_pipe<S>(
    pipe: &mut Option<S>,
    source: LogSource,
    pid: u32,
    cx: &mut Context<'_>,
) -> Poll<Option<ProcessEvent>>
where
    S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    let Some(stream) = pipe else {
        return Poll::Ready(None);
    };
    match Pin::new(stream).poll_next(cx) {
        Poll::Ready(Some(Ok(raw))) => Poll::Ready(Some(ProcessEvent::line(source, decode_line(raw)))),
        Poll::Ready(Some(Err(e))) => {
            warn!(pid, ?source, error = %e, "Read error on process output, treating as end of stream");
            *pipe = None;
            Poll::Ready(None)
        }
        Poll::Ready(None) => {
            *pipe = None;
            Poll::Ready(None)
        }
        Poll::Pending => Poll::Pending,
    }
}

impl Stream for ProcessEventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        // Send Started event first
        if !this.started_sent {
            this.started_sent = true;
            let event = ProcessEvent::new(ProcessEventType::Started { pid: this.child_id });
            return Poll::Ready(Some(event));
        }

        let pid = this.child_id;
        this.stderr_first = !this.stderr_first;
        for use_stderr in [this.stderr_first, !this.stderr_first] {
            let polled = if use_stderr {
                poll_pipe(&mut this.stderr, LogSource::Stderr, pid, cx)
            } else {
                poll_pipe(&mut this.stdout, LogSource::Stdout, pid, cx)
            };
            if let Poll::Ready(Some(event)) = polled {
                return Poll::Ready(Some(event));
            }
        }

        // If both streams are closed, the stream is exhausted
        if this.stdout.is_none() && this.stderr.is_none() {
            return Poll::Ready(None);
        }

        // One or both streams are still pending
        Poll::Pending
    }
}
