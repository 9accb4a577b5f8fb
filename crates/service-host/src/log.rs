//! Bounded log shared by every supervised process

use async_channel::{Sender, TrySendError};
use futures::Stream;
use process_supervisor::{LineSink, OverflowPolicy};
use smol::Task;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Default number of lines kept
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Circular buffer of output lines
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    /// Total lines ever pushed, used as a read cursor
    appended: u64,
}

impl LogBuffer {
    /// Create a buffer holding at most `max_lines` lines
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines,
            appended: 0,
        }
    }

    /// Push a line, evicting the oldest one at capacity
    pub fn push_line(&mut self, line: impl Into<String>) {
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
        self.appended += 1;
    }

    /// Buffered lines, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Lines pushed at or after `cursor` that are still buffered
    ///
    /// Returns the lines and the cursor to pass next time.
    pub fn lines_since(&self, cursor: u64) -> (Vec<String>, u64) {
        let first = self.appended - self.lines.len() as u64;
        let skip = cursor.saturating_sub(first) as usize;
        let lines = self.lines.iter().skip(skip).cloned().collect();
        (lines, self.appended)
    }

    /// Number of buffered lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer holds no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Maximum number of lines kept
    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    /// Drop every buffered line
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Buffered lines joined with `\n`
    pub fn export(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

struct Shared {
    buffer: Mutex<LogBuffer>,
    enabled: AtomicBool,
    watchers: Mutex<Vec<Sender<()>>>,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wake every watcher; a watcher with a pending wake-up is left as is
    fn notify(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        watchers.retain(|tx| !matches!(tx.try_send(()), Err(TrySendError::Closed(_))));
    }
}

/// Thread-safe log of the merged output of all supervised processes
///
/// Cloning is cheap and every clone shares the same buffer. Lines are opaque
/// text: no source attribution, no parsing.
#[derive(Clone)]
pub struct LogAggregator {
    shared: Arc<Shared>,
}

impl LogAggregator {
    /// Create an enabled aggregator keeping `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(LogBuffer::new(capacity)),
                enabled: AtomicBool::new(true),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Append one line; empty lines and appends while disabled are ignored
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        if line.is_empty() || !self.is_enabled() {
            return;
        }
        self.shared.buffer().push_line(line);
        self.shared.notify();
    }

    /// Current content, lines joined with `\n`
    pub fn snapshot(&self) -> String {
        self.shared.buffer().export()
    }

    /// Current lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.shared.buffer().lines().map(str::to_string).collect()
    }

    /// See [`LogBuffer::lines_since`]
    pub fn lines_since(&self, cursor: u64) -> (Vec<String>, u64) {
        self.shared.buffer().lines_since(cursor)
    }

    /// Empty the buffer
    pub fn clear(&self) {
        self.shared.buffer().clear();
        self.shared.notify();
    }

    /// Turn appending on or off; buffered content is kept either way
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.shared.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            debug!(enabled, "Log output toggled");
        }
    }

    /// Whether appends are recorded
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Number of buffered lines
    pub fn len(&self) -> usize {
        self.shared.buffer().len()
    }

    /// Whether no lines are buffered
    pub fn is_empty(&self) -> bool {
        self.shared.buffer().is_empty()
    }

    /// Maximum number of lines kept
    pub fn capacity(&self) -> usize {
        self.shared.buffer().capacity()
    }

    /// Create the line channel supervisors deliver into
    ///
    /// The returned task appends every received line and finishes once all
    /// clones of the sink are dropped. Dropping the task stops the draining.
    pub fn attach(&self, channel_capacity: usize, overflow: OverflowPolicy) -> (LineSink, Task<()>) {
        let (sink, rx) = LineSink::channel(channel_capacity, overflow);
        let log = self.clone();
        let task = smol::spawn(async move {
            while let Ok(line) = rx.recv().await {
                log.append(line);
            }
            debug!("All line sinks closed, log drain finished");
        });
        (sink, task)
    }

    /// Stream of snapshots
    ///
    /// Yields the current content immediately and again after mutations.
    /// Mutations that happen while the observer is busy are coalesced into a
    /// single snapshot of the latest content.
    pub fn watch(&self) -> impl Stream<Item = String> + Send + Unpin + 'static {
        let (tx, rx) = async_channel::bounded(1);
        let _ = tx.try_send(());
        self.shared
            .watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);

        let shared = self.shared.clone();
        Box::pin(futures::stream::unfold((rx, shared), |(rx, shared)| async move {
            rx.recv().await.ok()?;
            let snapshot = shared.buffer().export();
            Some((snapshot, (rx, shared)))
        }))
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl std::fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAggregator")
            .field("lines", &self.len())
            .field("capacity", &self.capacity())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
